const BVID_LEN: usize = 12;

/// Returns true if `candidate` is exactly one well-formed BV id
pub fn is_bvid(candidate: &str) -> bool {
    candidate.len() == BVID_LEN
        && candidate.starts_with("BV")
        && candidate[2..].chars().all(|c| c.is_ascii_alphanumeric())
}

/// Finds the first BV id embedded in arbitrary text (URLs, attributes, titles)
///
/// # Examples
///
/// ```
/// use bili_harvest::url::extract_bvid;
///
/// assert_eq!(
///     extract_bvid("//www.bilibili.com/video/BV1xx411c7mD/?spm_id_from=333"),
///     Some("BV1xx411c7mD".to_string())
/// );
/// assert_eq!(extract_bvid("/video/av170001"), None);
/// ```
pub fn extract_bvid(text: &str) -> Option<String> {
    text.match_indices("BV").find_map(|(start, _)| {
        let candidate = text.get(start..start + BVID_LEN)?;
        is_bvid(candidate).then(|| candidate.to_string())
    })
}
