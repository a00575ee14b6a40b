// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Logging shims. Forward to `defmt` with the `defmt-logging` feature,
//! otherwise evaluate the arguments and drop them.

#![allow(unused_macros)]

#[cfg(feature = "defmt-logging")]
macro_rules! boot_log {
    (trace, $($arg:expr),*) => { defmt::trace!($($arg),*) };
    (debug, $($arg:expr),*) => { defmt::debug!($($arg),*) };
    (info,  $($arg:expr),*) => { defmt::info!($($arg),*) };
    (warn,  $($arg:expr),*) => { defmt::warn!($($arg),*) };
    (error, $($arg:expr),*) => { defmt::error!($($arg),*) };
}

#[cfg(not(feature = "defmt-logging"))]
macro_rules! boot_log {
    ($level:ident, $($arg:expr),*) => {{ $( let _ = &$arg; )* }};
}

macro_rules! boot_trace {
    ($($arg:expr),*) => (boot_log!(trace, $($arg),*));
}

macro_rules! boot_debug {
    ($($arg:expr),*) => (boot_log!(debug, $($arg),*));
}

macro_rules! boot_info {
    ($($arg:expr),*) => (boot_log!(info, $($arg),*));
}

macro_rules! boot_warn {
    ($($arg:expr),*) => (boot_log!(warn, $($arg),*));
}

macro_rules! boot_error {
    ($($arg:expr),*) => (boot_log!(error, $($arg),*));
}
