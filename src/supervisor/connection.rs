//! Connection-string derivation for supervised instances.

/// URI scheme of `MongoDB` connection strings.
pub const SCHEME: &str = "mongodb://";

/// Builds the connection string for an instance.
///
/// `client_host` replaces the host; when it already starts with
/// `mongodb://` it is returned verbatim as the whole connection string.
///
/// # Examples
///
/// ```
/// use mongo_ephemeral::supervisor::connection_string;
///
/// assert_eq!(connection_string("127.0.0.1", 27017, None, None), "mongodb://127.0.0.1:27017");
/// assert_eq!(
///     connection_string("127.0.0.1", 27017, Some("shop"), None),
///     "mongodb://127.0.0.1:27017/shop"
/// );
/// ```
#[must_use]
pub fn connection_string(
    host: &str,
    port: u16,
    dbname: Option<&str>,
    client_host: Option<&str>,
) -> String {
    if let Some(verbatim) = client_host.filter(|value| value.starts_with(SCHEME)) {
        return verbatim.to_owned();
    }
    let authority = client_host.unwrap_or(host);
    match dbname.filter(|name| !name.is_empty()) {
        Some(name) => format!("{SCHEME}{authority}:{port}/{name}"),
        None => format!("{SCHEME}{authority}:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::plain(None, None, "mongodb://127.0.0.1:27017")]
    #[case::with_database(Some("shop"), None, "mongodb://127.0.0.1:27017/shop")]
    #[case::empty_database(Some(""), None, "mongodb://127.0.0.1:27017")]
    #[case::host_override(None, Some("db.local"), "mongodb://db.local:27017")]
    #[case::verbatim_override(
        Some("shop"),
        Some("mongodb://user:pw@elsewhere:1/admin"),
        "mongodb://user:pw@elsewhere:1/admin"
    )]
    fn formats_connection_strings(
        #[case] dbname: Option<&str>,
        #[case] client_host: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(
            connection_string("127.0.0.1", 27017, dbname, client_host),
            expected
        );
    }
}
