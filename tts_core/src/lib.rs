//! Speech synthesis collaborator.
//!
//! Synthesis is modelled as a remote "take" service: text is submitted,
//! the returned handle is polled until the take is ready, and the result
//! is an opaque [`AudioReference`] (a playable URL) rather than decoded
//! audio. [`DaisysClient`] implements [`SynthesisService`] against the
//! Daisys Speak API. When no credentials are configured the service is
//! simply absent; see [`SynthesisConfig::from_env`].
mod config;
mod daisys;
mod service;

pub use config::SynthesisConfig;
pub use daisys::DaisysClient;
pub use service::{AudioReference, SynthesisError, SynthesisService, TakeHandle, TakeStatus};
