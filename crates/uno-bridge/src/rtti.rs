//! Native type-info names for component types
//!
//! Native throwers look up the `type_info` of an exception by its Itanium
//! mangled name. Component type names are dotted paths
//! (`com.sun.star.uno.RuntimeException`), which map to nested names
//! (`N3com3sun4star3uno16RuntimeExceptionE`).

/// Mangle a dotted component type name into an Itanium nested name.
///
/// Names without a dot mangle to a plain source name (`5Plain`).
pub fn mangle(uno_name: &str) -> String {
    let mut out = String::with_capacity(uno_name.len() + 16);
    let nested = uno_name.contains('.');
    if nested {
        out.push('N');
    }
    for segment in uno_name.split('.') {
        out.push_str(&segment.len().to_string());
        out.push_str(segment);
    }
    if nested {
        out.push('E');
    }
    out
}

/// Inverse of [`mangle`]. Returns `None` for anything that is not a
/// sequence of length-prefixed source names.
pub fn uno_name(mangled: &str) -> Option<String> {
    let (body, nested) = match mangled.strip_prefix('N') {
        Some(rest) => (rest.strip_suffix('E')?, true),
        None => (mangled, false),
    };

    let bytes = body.as_bytes();
    let mut segments = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let digits = bytes[pos..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        let len: usize = body[pos..pos + digits].parse().ok()?;
        pos += digits;
        let end = pos.checked_add(len).filter(|&end| end <= bytes.len() && len > 0)?;
        segments.push(body.get(pos..end)?);
        pos = end;
    }

    if segments.is_empty() || (nested && segments.len() < 2) || (!nested && segments.len() != 1) {
        return None;
    }
    Some(segments.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangle_runtime_exception() {
        assert_eq!(
            mangle("com.sun.star.uno.RuntimeException"),
            "N3com3sun4star3uno16RuntimeExceptionE"
        );
        assert_eq!(mangle("Plain"), "5Plain");
    }

    #[test]
    fn test_demangle() {
        assert_eq!(
            uno_name("N3com3sun4star3uno16RuntimeExceptionE").as_deref(),
            Some("com.sun.star.uno.RuntimeException")
        );
        assert_eq!(uno_name("5Plain").as_deref(), Some("Plain"));
        let name = "test.pkg.lang.IllegalArgumentException";
        assert_eq!(uno_name(&mangle(name)).as_deref(), Some(name));
    }

    #[test]
    fn test_demangle_rejects_garbage() {
        assert!(uno_name("").is_none());
        assert!(uno_name("N3comE").is_none());
        assert!(uno_name("N3com9sunE").is_none());
        assert!(uno_name("Nabc").is_none());
        assert!(uno_name("3abc4de").is_none());
    }
}
