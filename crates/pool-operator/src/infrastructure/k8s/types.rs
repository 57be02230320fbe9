use core::error::Error;

/// Errors that can occur talking to the API server outside the store traits.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to patch status of {kind} {name}")]
    StatusPatchFailed { kind: String, name: String },
}

impl Error for KubernetesError {}
