//! Just enough `multipart/form-data` to read text fields out of a buffered
//! body. File parts are skipped.

/// Parts looked at per body; anything after is ignored.
const MAX_PARTS: usize = 256;

/// The `boundary` parameter of a `multipart/form-data` content type.
pub(crate) fn boundary(content_type: &str) -> Option<&str> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| unquote(value.trim()))
        .filter(|value| !value.is_empty() && value.len() <= 70)
}

/// Values of every non-file field called `name`, in body order.
pub(crate) fn field_values(body: &[u8], boundary: &str, name: &str) -> Vec<String> {
    let delimiter = format!("--{boundary}");
    let inner = format!("\n{delimiter}");
    let mut values = Vec::new();

    let Some(start) = find(body, delimiter.as_bytes()) else {
        return values;
    };
    let mut rest = &body[start + delimiter.len()..];

    for _ in 0..MAX_PARTS {
        if rest.starts_with(b"--") {
            break;
        }
        let Some(after_line) = skip_line_end(rest) else {
            break;
        };
        let Some(end) = find(after_line, inner.as_bytes()) else {
            break;
        };
        let part = after_line[..end].strip_suffix(b"\r").unwrap_or(&after_line[..end]);
        rest = &after_line[end + inner.len()..];

        if let Some((field, content)) = split_part(part) {
            if field == name {
                values.push(String::from_utf8_lossy(content).into_owned());
            }
        }
    }
    values
}

/// The field name and content of a text part; `None` for file parts and
/// anything that is not `form-data`.
fn split_part(part: &[u8]) -> Option<(&str, &[u8])> {
    let (head, content) = match find(part, b"\r\n\r\n") {
        Some(i) => (&part[..i], &part[i + 4..]),
        None => {
            let i = find(part, b"\n\n")?;
            (&part[..i], &part[i + 2..])
        }
    };
    let head = std::str::from_utf8(head).ok()?;

    let disposition = head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case("content-disposition").then_some(value)
    })?;

    let mut params = disposition.split(';');
    if !params.next()?.trim().eq_ignore_ascii_case("form-data") {
        return None;
    }
    let mut field = None;
    for param in params {
        let Some((key, value)) = param.trim().split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => field = Some(unquote(value.trim())),
            "filename" => return None,
            _ => {}
        }
    }
    Some((field?, content))
}

fn skip_line_end(rest: &[u8]) -> Option<&[u8]> {
    rest.strip_prefix(b"\r\n").or_else(|| rest.strip_prefix(b"\n"))
}

fn unquote(value: &str) -> &str {
    value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}
