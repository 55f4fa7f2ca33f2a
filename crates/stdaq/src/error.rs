// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::config::ConfigError;
use crate::recv::NetError;
use crate::store::StoreError;
use std::fmt;

/// Errors surfaced by the buffering layer.
///
/// Only setup and resource failures end up here. Missing packets, duplicate
/// module arrivals and evictions are counted in statistics instead.
#[derive(Debug)]
pub enum Error {
    /// Shared-memory resource failure (fatal)
    Store(StoreError),
    /// Socket setup or receive failure
    Net(NetError),
    /// Invalid configuration
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Net(e) => write!(f, "network: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Net(e) => Some(e),
            Self::Config(e) => Some(e),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<NetError> for Error {
    fn from(e: NetError) -> Self {
        Self::Net(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Result alias for crate-level operations.
pub type Result<T> = std::result::Result<T, Error>;
