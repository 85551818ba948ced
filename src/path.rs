//! Logical path normalisation and collision-free naming.

use std::fmt::Debug;

/// Normalise a path into the logical namespace.
///
/// Repeated separators collapse, leading and trailing separators are
/// stripped, and the result carries exactly one leading `/`.
///
/// ```
/// use proxy_storage::clean_path;
///
/// assert_eq!(clean_path("///file/hello.txt///"), "/file/hello.txt");
/// assert_eq!(clean_path("file/hello.txt/"), "/file/hello.txt");
/// ```
pub fn clean_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

/// Variant `attempt` of `name`: the name itself for attempt 0, otherwise the
/// file stem suffixed with `_<attempt>` and the extension preserved.
///
/// Leading dots of the file name are not treated as an extension separator,
/// so `.env` becomes `.env_1`.
pub fn suffixed(name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }

    let (dir, file) = match name.rfind('/') {
        Some(i) => name.split_at(i + 1),
        None => ("", name),
    };

    let leading_dots = file.len() - file.trim_start_matches('.').len();
    let (stem, ext) = match file[leading_dots..].rfind('.') {
        Some(i) => file.split_at(leading_dots + i),
        None => (file, ""),
    };

    format!("{dir}{stem}_{attempt}{ext}")
}

/// Policy producing candidate logical names when the preferred one is taken.
///
/// Implementations must be pure: the proxy asks for attempts `0, 1, 2, ...`
/// until the metadata backend reports a candidate unused.
pub trait NamePolicy: Send + Sync + Debug {
    fn candidate(&self, name: &str, attempt: usize) -> String;
}

/// The default policy: `hello.txt`, `hello_1.txt`, `hello_2.txt`, ...
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterSuffix;

impl NamePolicy for CounterSuffix {
    fn candidate(&self, name: &str, attempt: usize) -> String {
        suffixed(name, attempt)
    }
}
