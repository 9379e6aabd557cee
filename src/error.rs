// SkWatch - Library Errors

use thiserror::Error;

use crate::config::{WIFI_PASSWORD_MAX, WIFI_SSID_MAX};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("async dispatcher is not running")]
    DispatcherStopped,
    #[error("retry schedule must contain at least one step")]
    EmptyRetrySchedule,
    #[error("ssid must not be empty")]
    EmptySsid,
    #[error("ssid is longer than {} bytes", WIFI_SSID_MAX)]
    SsidTooLong,
    #[error("password is longer than {} bytes", WIFI_PASSWORD_MAX)]
    PasswordTooLong,
}

pub type Result<T> = core::result::Result<T, Error>;
