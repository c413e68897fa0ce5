//! The collaborators a session works with.

/// Microphone, service client, audio output and presentation, bundled so
/// the bootstrap can borrow them and the orchestrator can own them.
pub struct Capabilities<M, S, P, R> {
    pub microphone: M,
    pub service: S,
    pub player: P,
    pub presenter: R,
}
