//! Just enough multipart/form-data parsing to pull one uploaded file out of
//! a request body.

/// A file part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub field: Option<String>,
    pub filename: String,
    pub data: Vec<u8>,
}

/// Returns the index of the first occurrence of `needle` in `haystack`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits `haystack` on every occurrence of `needle`, returning the pieces
/// between occurrences (excluding the needle itself).
pub fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut result = Vec::new();
    let mut start = 0;
    while start <= haystack.len() {
        if let Some(pos) = find_subsequence(&haystack[start..], needle) {
            result.push(&haystack[start..start + pos]);
            start += pos + needle.len();
        } else {
            result.push(&haystack[start..]);
            break;
        }
    }
    result
}

/// Extracts the boundary token from a Content-Type header value like
/// `multipart/form-data; boundary=----WebKitFormBoundaryXXX`.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(|s| s.trim())
        .find_map(|s| s.strip_prefix("boundary="))
        .map(|s| s.trim_matches('"').to_owned())
        .filter(|s| !s.is_empty())
}

/// Value of `key="..."` inside a Content-Disposition header block.
fn disposition_param(headers: &str, key: &str) -> Option<String> {
    let pattern = format!("{key}=\"");
    let mut search = headers;
    while let Some(pos) = search.find(&pattern) {
        // `name="` also matches the tail of `filename="`
        let preceded_by_word = search[..pos]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        let rest = &search[pos + pattern.len()..];
        if !preceded_by_word {
            let end = rest.find('"')?;
            return Some(rest[..end].to_owned());
        }
        search = rest;
    }
    None
}

/// All file parts of a multipart/form-data body, in order.
pub fn extract_files(body: &[u8], boundary: &str) -> Vec<UploadedFile> {
    let delimiter = format!("--{boundary}");
    let sep = b"\r\n\r\n";

    split_on(body, delimiter.as_bytes())
        .into_iter()
        .filter_map(|part| {
            let sep_pos = find_subsequence(part, sep)?;
            let headers = String::from_utf8_lossy(&part[..sep_pos]);
            let filename = disposition_param(&headers, "filename")?;
            let raw = &part[sep_pos + sep.len()..];
            let data = raw.strip_suffix(b"\r\n").unwrap_or(raw);
            Some(UploadedFile {
                field: disposition_param(&headers, "name"),
                filename,
                data: data.to_vec(),
            })
        })
        .collect()
}

/// The file uploaded under `field_name`, falling back to the first file in
/// the body.
pub fn extract_file(body: &[u8], boundary: &str, field_name: &str) -> Option<UploadedFile> {
    let mut files = extract_files(body, boundary);
    let position = files
        .iter()
        .position(|f| f.field.as_deref() == Some(field_name))
        .unwrap_or(0);
    (position < files.len()).then(|| files.swap_remove(position))
}
