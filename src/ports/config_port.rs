//! Configuration access port.

/// Sectioned key/value settings. Values come back as raw strings; callers
/// parse and report bad values themselves.
pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
}
