use crate::SourceLocation;

/// Keeps ASCII alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
fn sanitize_stem(stem: &str) -> String {
    stem.trim()
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c,
            '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

/// Output name for the `index`-th item of a batch.
///
/// The index prefix keeps names unique when several sources share a stem.
pub fn output_file_name(index: usize, source: &SourceLocation) -> String {
    let stem = source
        .file_stem()
        .map(|stem| sanitize_stem(&stem))
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "image".to_string());

    format!("{index:05}-{stem}.png")
}

/// Binary-prefixed size for the batch summary, e.g. `1.5 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }

    format!("{size:.1} {}", UNITS[unit])
}
