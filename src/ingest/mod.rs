/// Third-party data source clients.
///
/// Submodules:
/// - `bmkg` — BMKG public weather forecast (rainfall channels).

pub mod bmkg;
