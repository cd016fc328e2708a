use std::collections::HashMap;

/// Parse query parameters from a URI string
///
/// Values are URL-decoded; when a key repeats, the last value wins.
///
/// # Example
/// ```
/// use bord::core::query_params::parse_query_params;
///
/// let params = parse_query_params("/api/v1/post/userpost/all?author=a%2Db");
/// assert_eq!(params.get("author"), Some(&"a-b".to_string()));
/// ```
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    let Some((_, query)) = uri.split_once('?') else {
        return params;
    };

    for param in query.split('&').filter(|p| !p.is_empty()) {
        let (key, encoded_value) = param.split_once('=').unwrap_or((param, ""));
        let decoded = urlencoding::decode(encoded_value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| encoded_value.to_string());
        params.insert(key.to_string(), decoded);
    }

    params
}

/// Non-empty string parameter, if present.
pub fn get_string(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params.get(key).filter(|v| !v.is_empty()).cloned()
}
