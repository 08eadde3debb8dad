// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// Failures that reach the host loop. Driver status codes are translated
/// into one of these before leaving the backend; out-of-date, suboptimal and
/// minimised surfaces are handled internally and never appear here.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("{0}: out of device memory or handles")]
    ResourceExhausted(&'static str),

    #[error("{0}: device lost")]
    DeviceLost(&'static str),

    #[error("{0}: timed out waiting on the GPU")]
    Timeout(&'static str),

    #[error("presentation surface lost")]
    SurfaceLost,

    #[error("surface offers no usable {0}")]
    Unsupported(&'static str),

    #[error("{what}: driver error {detail}")]
    Driver { what: &'static str, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The tick failed; the loop may retry on the next tick.
    Recoverable,
    /// The render loop must stop.
    Fatal,
}

impl FrameError {
    pub fn severity(&self) -> Severity {
        match self {
            FrameError::ResourceExhausted(_) => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
