//! Unguessable URL file names.
//!
//! Every served file gets a random alphanumeric token as its URL name. The
//! token is the only thing standing between a visitor and the file, so its
//! length is chosen to give at least 128 bits of guessing resistance. The
//! source file's extension is appended so browsers and download tools still pick
//! a sensible content type and file name.

use std::path::Path;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Number of characters in a generated token.
///
/// 62^22 is roughly 2^131, comfortably above the 2^128 floor.
pub const TOKEN_LENGTH: usize = 22;

/// Size of the alphabet tokens are drawn from (`[A-Za-z0-9]`).
pub const TOKEN_ALPHABET_SIZE: u32 = 62;

/// Compression suffixes that usually sit on top of another extension.
const COMPRESSION_SUFFIXES: &[&str] = &["gz", "bz2", "xz"];

/// Generate a URL file name for `source`.
///
/// The result is a fresh random token followed by the extension of the
/// source file name, e.g. `report.pdf` becomes `Xq3...9a.pdf` and
/// `backup.tar.gz` becomes `Xq3...9a.tar.gz`. Names without an extension
/// produce a bare token.
pub fn generate_filename(source: &Path) -> String {
    let mut name = random_token(TOKEN_LENGTH);
    name.push_str(&url_extension(source));
    name
}

/// Random alphanumeric token of the given length.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Extension to carry over into the URL, including the leading dot.
///
/// Only the final path component is inspected. Compound archive suffixes
/// (`.tar.gz`, `.tar.bz2`, `.tar.xz`) are kept whole.
pub fn url_extension(source: &Path) -> String {
    let Some(name) = source.file_name().map(Path::new) else {
        return String::new();
    };
    let Some(ext) = non_empty_extension(name) else {
        return String::new();
    };

    let is_compression = COMPRESSION_SUFFIXES
        .iter()
        .any(|suffix| suffix.eq_ignore_ascii_case(ext));

    if is_compression {
        let inner = name
            .file_stem()
            .map(Path::new)
            .and_then(non_empty_extension);
        if let Some(inner) = inner {
            return format!(".{}.{}", inner, ext);
        }
    }

    format!(".{}", ext)
}

fn non_empty_extension(name: &Path) -> Option<&str> {
    name.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
}
