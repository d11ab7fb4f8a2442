//! Error types for KNXnet/IP operations.
//!
//! Errors are grouped into structured categories, each wrapping an internal
//! kind enum and (when the `std` feature is enabled) a captured backtrace.
//! Helper constructors keep call sites short; helper predicates let callers
//! branch without matching on internals.

use core::fmt;

#[cfg(feature = "std")]
use std::backtrace::Backtrace;

/// Result type alias for KNX operations.
pub type Result<T> = core::result::Result<T, KnxError>;

// =============================================================================
// Error Kind Enums (Internal)
// =============================================================================

/// Malformed inbound or outbound byte sequences (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum FormatErrorKind {
    BadHeader,
    UnsupportedVersion,
    UnknownServiceType,
    TruncatedFrame,
    OversizeLength,
    InvalidMessageCode,
    InvalidAdditionalInfo,
    InvalidAddress,
}

/// Peer-reported failures and unrecoverable protocol states (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ProtocolErrorKind {
    ConnectRejected,
    AckStatus,
    FeatureStatus,
}

/// Expired protocol timers (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TimeoutErrorKind {
    Connect,
    Ack,
    Heartbeat,
    Description,
    FeatureGet,
}

/// Socket and buffer failures (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TransportErrorKind {
    SendFailed,
    ReceiveFailed,
    BindFailed,
    MulticastJoin,
    BufferTooSmall,
    Closed,
}

/// Caller-supplied values outside their wire ranges (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum ArgumentErrorKind {
    HopCountRange,
    AddressRange,
    PollSlotsRange,
    PollDataRange,
    PayloadTooLarge,
}

// =============================================================================
// Main Error Type
// =============================================================================

/// KNX protocol error.
///
/// This is the error type returned by every fallible operation in the
/// crate. The category tells a caller how to react: format errors on
/// inbound frames are logged and dropped by the connection loops, timeout
/// and protocol errors on a tunneling session are fatal for that session,
/// and overflow on the routing queue is a notification, never fatal.
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub enum KnxError {
    /// Malformed bytes (bad header magic, truncation, invalid address text, ...)
    Format(FormatError),
    /// Peer returned a non-zero status or the exchange left a broken state
    Protocol(ProtocolError),
    /// A protocol timer expired (connect, ack, heartbeat, ...)
    Timeout(TimeoutError),
    /// Socket I/O or buffer failure
    Transport(TransportError),
    /// The bounded routing send queue is full
    QueueFull,
    /// Caller-supplied value out of range
    Argument(ArgumentError),
    /// Operation requires an established connection
    NotConnected,
}

// =============================================================================
// Structured Error Types
// =============================================================================

/// Format error with optional backtrace
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct FormatError {
    kind: FormatErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl FormatError {
    pub(crate) fn new(kind: FormatErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if the frame was shorter than its declared length
    pub fn is_truncated(&self) -> bool {
        matches!(self.kind, FormatErrorKind::TruncatedFrame)
    }

    /// Check if an address string or raw address failed to parse
    pub fn is_invalid_address(&self) -> bool {
        matches!(self.kind, FormatErrorKind::InvalidAddress)
    }
}

/// Protocol error carrying the peer's KNXnet/IP status byte
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    status: u8,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl ProtocolError {
    pub(crate) fn new(kind: ProtocolErrorKind, status: u8) -> Self {
        Self {
            kind,
            status,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// The KNXnet/IP status byte reported by the peer (0x00 when not applicable).
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Check if the gateway rejected the connection request
    pub fn is_connect_rejected(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::ConnectRejected)
    }
}

/// Timeout error with optional backtrace
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct TimeoutError {
    kind: TimeoutErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl TimeoutError {
    pub(crate) fn new(kind: TimeoutErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if this is the acknowledge timeout (after the retransmission)
    pub fn is_ack(&self) -> bool {
        matches!(self.kind, TimeoutErrorKind::Ack)
    }

    /// Check if this is the connect timeout
    pub fn is_connect(&self) -> bool {
        matches!(self.kind, TimeoutErrorKind::Connect)
    }

    /// Check if three consecutive heartbeats went unanswered
    pub fn is_heartbeat(&self) -> bool {
        matches!(self.kind, TimeoutErrorKind::Heartbeat)
    }
}

/// Transport error with optional backtrace
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct TransportError {
    kind: TransportErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl TransportError {
    pub(crate) fn new(kind: TransportErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if an output buffer was too small for the frame
    pub fn is_buffer_too_small(&self) -> bool {
        matches!(self.kind, TransportErrorKind::BufferTooSmall)
    }
}

/// Argument error with optional backtrace
#[derive(Debug)]
#[cfg_attr(all(feature = "defmt", not(feature = "std")), derive(defmt::Format))]
pub struct ArgumentError {
    kind: ArgumentErrorKind,
    #[cfg(feature = "std")]
    backtrace: Backtrace,
}

impl ArgumentError {
    pub(crate) fn new(kind: ArgumentErrorKind) -> Self {
        Self {
            kind,
            #[cfg(feature = "std")]
            backtrace: Backtrace::capture(),
        }
    }

    /// Check if a value fell outside its wire range
    pub fn is_out_of_range(&self) -> bool {
        !matches!(self.kind, ArgumentErrorKind::PayloadTooLarge)
    }
}

// =============================================================================
// Convenience Constructors for KnxError
// =============================================================================

impl KnxError {
    // Format errors
    pub(crate) fn bad_header() -> Self {
        Self::Format(FormatError::new(FormatErrorKind::BadHeader))
    }

    pub(crate) fn unsupported_version() -> Self {
        Self::Format(FormatError::new(FormatErrorKind::UnsupportedVersion))
    }

    pub(crate) fn unknown_service_type() -> Self {
        Self::Format(FormatError::new(FormatErrorKind::UnknownServiceType))
    }

    pub(crate) fn truncated_frame() -> Self {
        Self::Format(FormatError::new(FormatErrorKind::TruncatedFrame))
    }

    pub(crate) fn oversize_length() -> Self {
        Self::Format(FormatError::new(FormatErrorKind::OversizeLength))
    }

    pub(crate) fn invalid_message_code() -> Self {
        Self::Format(FormatError::new(FormatErrorKind::InvalidMessageCode))
    }

    pub(crate) fn invalid_additional_info() -> Self {
        Self::Format(FormatError::new(FormatErrorKind::InvalidAdditionalInfo))
    }

    pub(crate) fn invalid_address() -> Self {
        Self::Format(FormatError::new(FormatErrorKind::InvalidAddress))
    }

    // Protocol errors
    pub(crate) fn connect_rejected(status: u8) -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::ConnectRejected, status))
    }

    pub(crate) fn ack_status(status: u8) -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::AckStatus, status))
    }

    pub(crate) fn feature_status(status: u8) -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::FeatureStatus, status))
    }

    // Timeout errors
    pub(crate) fn connect_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::Connect))
    }

    pub(crate) fn ack_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::Ack))
    }

    pub(crate) fn heartbeat_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::Heartbeat))
    }

    pub(crate) fn description_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::Description))
    }

    pub(crate) fn feature_timeout() -> Self {
        Self::Timeout(TimeoutError::new(TimeoutErrorKind::FeatureGet))
    }

    // Transport errors
    pub(crate) fn send_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::SendFailed))
    }

    pub(crate) fn receive_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::ReceiveFailed))
    }

    pub(crate) fn bind_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::BindFailed))
    }

    pub(crate) fn multicast_join_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::MulticastJoin))
    }

    pub(crate) fn buffer_too_small() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::BufferTooSmall))
    }

    pub(crate) fn transport_closed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::Closed))
    }

    // Argument errors
    pub(crate) fn hop_count_range() -> Self {
        Self::Argument(ArgumentError::new(ArgumentErrorKind::HopCountRange))
    }

    pub(crate) fn address_out_of_range() -> Self {
        Self::Argument(ArgumentError::new(ArgumentErrorKind::AddressRange))
    }

    pub(crate) fn poll_slots_range() -> Self {
        Self::Argument(ArgumentError::new(ArgumentErrorKind::PollSlotsRange))
    }

    pub(crate) fn poll_data_range() -> Self {
        Self::Argument(ArgumentError::new(ArgumentErrorKind::PollDataRange))
    }

    pub(crate) fn payload_too_large() -> Self {
        Self::Argument(ArgumentError::new(ArgumentErrorKind::PayloadTooLarge))
    }

    /// Check if this is any timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this is a format error (malformed frame or address text)
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxError::Format(e) => write!(f, "format error: {:?}", e.kind),
            KnxError::Protocol(e) => {
                write!(f, "protocol error: {:?} (status 0x{:02X})", e.kind, e.status)
            }
            KnxError::Timeout(e) => write!(f, "timeout: {:?}", e.kind),
            KnxError::Transport(e) => write!(f, "transport error: {:?}", e.kind),
            KnxError::QueueFull => write!(f, "routing send queue full"),
            KnxError::Argument(e) => write!(f, "invalid argument: {:?}", e.kind),
            KnxError::NotConnected => write!(f, "not connected"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KnxError {}
