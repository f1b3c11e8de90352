//! The capability a pooled resource must provide

/// A reusable resource managed by a [`Pool`](crate::Pool).
///
/// The pool never looks inside a connection. It only asks whether it is
/// still usable and tells it to close.
///
/// # Examples
///
/// ```
/// use esox_connpool::Connection;
/// use std::net::TcpStream;
///
/// struct Tcp(TcpStream);
///
/// impl Connection for Tcp {
///     type Error = std::io::Error;
///
///     fn close(&mut self) -> Result<(), Self::Error> {
///         self.0.shutdown(std::net::Shutdown::Both)
///     }
///
///     fn is_alive(&self) -> bool {
///         self.0.peer_addr().is_ok()
///     }
/// }
/// ```
pub trait Connection: Send + 'static {
    /// Error produced by the connection and by its factory.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Release the underlying handle.
    fn close(&mut self) -> Result<(), Self::Error>;

    /// Cheap liveness probe. Must not do a network round-trip.
    fn is_alive(&self) -> bool;
}
