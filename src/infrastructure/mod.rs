pub mod aws;
pub mod bluetooth;
pub mod logging;
