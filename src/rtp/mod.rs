//! RTP/RTCP session layer (C6): bit-exact RFC 3550/3551 framing, cycle-aware
//! sequence accounting, the RFC 3550 jitter estimator, SR/RR/BYE, and
//! round-trip estimation from LSR/DLSR.
//!
//! `header` holds the wire format only (no session state); `session` owns the
//! per-SSRC send/receive state machine described in §3 and §4.4.2; `rtcp`
//! builds and parses the control-protocol packets described in §4.4.3.

pub mod header;
pub mod rtcp;
pub mod session;

pub use header::{RtpHeader, RtpPacket};
pub use rtcp::{Bye, ByeReason, ReceiverReport, ReceptionReport, RtcpPacket, Sdes, SenderReport};
pub use session::{ReceivePacketOutcome, RtpSession, RtpSessionConfig, RtpSessionStats};
