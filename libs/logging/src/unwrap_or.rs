//! Log a failed `Result<(), E>` instead of propagating it.
//!
//! The format string receives the error, including all its sources, as its last argument.

#[macro_export]
macro_rules! unwrap_or_warn {
    (
        $result:expr,
        $($arg:tt)*
    ) => {
        match $result {
            Ok(()) => {}
            Err(e) => {
                let error: &(dyn ::std::error::Error + 'static) = &e;

                ::tracing::warn!($($arg)*, $crate::err_with_src(error))
            }
        }
    };
}

#[macro_export]
macro_rules! unwrap_or_debug {
    (
        $result:expr,
        $($arg:tt)*
    ) => {
        match $result {
            Ok(()) => {}
            Err(e) => {
                let error: &(dyn ::std::error::Error + 'static) = &e;

                ::tracing::debug!($($arg)*, $crate::err_with_src(error))
            }
        }
    };
}
