//! Event emitter abstraction for decoupling producers from transport.
//!
//! The change watcher depends on the [`EventEmitter`] trait rather than on the
//! broker, enabling testing and alternative delivery paths.

use super::PlayerEvent;

/// Trait for emitting domain events without knowledge of transport.
///
/// Emitting must never block: implementations hand the event off and return.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn on_change(&self) {
///         self.emitter.emit_player(PlayerEvent::marker("update"));
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a player change event.
    fn emit_player(&self, event: PlayerEvent);
}
