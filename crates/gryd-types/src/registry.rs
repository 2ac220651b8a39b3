//! Registration of pluggable implementations.

/// Implemented by every pluggable backend (storage, account, chain backend)
/// so the builder can look up its factory by the name used in configuration.
pub trait ImplementationRegistry {
	/// Configuration key, e.g. `"file"` for `[storage.implementations.file]`.
	const NAME: &'static str;

	/// Factory function type for this kind of implementation.
	type Factory;

	fn factory() -> Self::Factory;
}
