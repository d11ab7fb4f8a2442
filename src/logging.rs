//! Unified logging macro.
//!
//! `knx_log!` expands to `defmt::…` when the `defmt` feature is active,
//! to `log::…` when the `log` feature is active, and to nothing otherwise.
//! Format strings must stay within the subset both backends accept
//! (positional `{}` with primitive arguments).

/// Logging macro selecting the backend at compile time.
///
/// ```ignore
/// knx_log!(info, "connected, channel {}", channel_id);
/// knx_log!(warn, "retransmitting seq {}", seq);
/// ```
#[macro_export]
#[cfg(feature = "defmt")]
macro_rules! knx_log {
    (trace, $($arg:tt)*) => { defmt::trace!($($arg)*) };
    (debug, $($arg:tt)*) => { defmt::debug!($($arg)*) };
    (info, $($arg:tt)*) => { defmt::info!($($arg)*) };
    (warn, $($arg:tt)*) => { defmt::warn!($($arg)*) };
    (error, $($arg:tt)*) => { defmt::error!($($arg)*) };
}

#[macro_export]
#[cfg(all(not(feature = "defmt"), feature = "log"))]
macro_rules! knx_log {
    (trace, $($arg:tt)*) => { log::trace!($($arg)*) };
    (debug, $($arg:tt)*) => { log::debug!($($arg)*) };
    (info, $($arg:tt)*) => { log::info!($($arg)*) };
    (warn, $($arg:tt)*) => { log::warn!($($arg)*) };
    (error, $($arg:tt)*) => { log::error!($($arg)*) };
}

#[macro_export]
#[cfg(all(not(feature = "defmt"), not(feature = "log")))]
macro_rules! knx_log {
    ($level:ident, $($arg:tt)*) => {{
        let _ = || ($($arg)*);
    }};
}
