// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Macros for checking expectations in test bodies without panicking.
//!
//! Each check names the error point it fails with, so that a failure can be traced back to the
//! exact check from the reported status alone.

/// Logs an error and fails the test with the given error point if the expression is false.
macro_rules! expect_impl {
    ($expectation:expr, $error_point:expr) => {
        if !$expectation {
            log::error!(
                "expectation failed at {}:{}:{}: {}",
                file!(),
                line!(),
                column!(),
                stringify!($expectation),
            );
            return Err($crate::status::TestError::error_point($error_point));
        }
    };
}
pub(crate) use expect_impl as expect;

/// Logs an error and fails the test with the given error point if the expressions are not equal.
macro_rules! expect_eq {
    ($left:expr, $right:expr, $error_point:expr) => {{
        let left = $left;
        let right = $right;
        if left != right {
            log::error!(
                "expectation failed at {}:{}:{}: `{} == {}`",
                file!(),
                line!(),
                column!(),
                stringify!($left),
                stringify!($right),
            );
            log::error!("  left: {:?}", left);
            log::error!(" right: {:?}", right);
            return Err($crate::status::TestError::error_point($error_point));
        }
    }};
}
pub(crate) use expect_eq;

/// Logs an error and fails the test with the given error point.
macro_rules! fail {
    ($error_point:expr, $($arg:tt)+) => {{
        log::error!($($arg)+);
        return Err($crate::status::TestError::error_point($error_point));
    }};
}
pub(crate) use fail;
