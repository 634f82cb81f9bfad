//! Collecting and validating image references from arguments and files.

use std::collections::HashSet;
use std::path::Path;

/// Gather references from positional arguments and an optional list file.
///
/// List files hold one reference per line; blank lines and `#` comments are
/// ignored. Duplicates are dropped, keeping the first occurrence.
pub fn collect_references(args: &[String], input_file: Option<&Path>) -> anyhow::Result<Vec<String>> {
    let mut raw: Vec<String> = args.to_vec();

    if let Some(path) = input_file {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        let content = std::fs::read_to_string(&expanded).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read input file {expanded}: {e}\n\n  Hint: Pass a text file with one image URL or path per line."
            )
        })?;
        raw.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }

    let total = raw.len();
    let mut seen = HashSet::new();
    let mut references = Vec::with_capacity(total);
    for reference in raw {
        let reference = validate_reference(&reference)?;
        if seen.insert(reference.clone()) {
            references.push(reference);
        }
    }

    if references.len() < total {
        tracing::info!("Ignoring {} duplicate reference(s)", total - references.len());
    }
    Ok(references)
}

/// Check that `raw` is an http(s) URL, an image data URI, or an existing
/// file; returns the reference with `~` expanded for paths.
pub fn validate_reference(raw: &str) -> anyhow::Result<String> {
    let reference = raw.trim();
    if reference.is_empty() {
        anyhow::bail!("Empty image reference");
    }

    if let Some(rest) = reference
        .strip_prefix("https://")
        .or_else(|| reference.strip_prefix("http://"))
    {
        if rest.split('/').next().unwrap_or_default().is_empty() {
            anyhow::bail!("Invalid image URL (missing host): {reference}");
        }
        return Ok(reference.to_string());
    }

    if reference.starts_with("data:") {
        if !reference.starts_with("data:image/") || !reference.contains(";base64,") {
            anyhow::bail!(
                "Unsupported data URI: expected data:image/<type>;base64,<data>"
            );
        }
        return Ok(reference.to_string());
    }

    let expanded = shellexpand::tilde(reference).into_owned();
    if !Path::new(&expanded).is_file() {
        anyhow::bail!(
            "Image not found: {reference}\n\n  Hint: References must be http(s) URLs, data URIs, or existing files."
        );
    }
    Ok(expanded)
}
