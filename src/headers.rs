use bytes::Bytes;

/// The draft advertised when accepting a session.
pub const WEBTRANSPORT_DRAFT: &str = "draft02";

/// An ordered list of header fields carried by one HEADERS frame.
///
/// Names and values are raw bytes; HTTP does not require them to be UTF-8.
/// Duplicate names are allowed and [`HeaderSet::get`] returns the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    fields: Vec<(Bytes, Bytes)>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The extended CONNECT request that opens a WebTransport session.
    pub fn connect_request(authority: &str, path: &str) -> Self {
        Self::from_iter([
            (":method", "CONNECT"),
            (":scheme", "https"),
            (":authority", authority),
            (":path", path),
            (":protocol", "webtransport"),
        ])
    }

    /// The response that accepts a session. The stream stays open.
    pub fn accepted() -> Self {
        Self::from_iter([(":status", "200"), ("sec-webtransport-http3-draft", WEBTRANSPORT_DRAFT)])
    }

    /// A bare status response, used to refuse a session.
    pub fn status(status: http::StatusCode) -> Self {
        Self::from_iter([(":status", status.as_str())])
    }

    pub fn push(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, v)| v.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.fields.iter().map(|(n, v)| (n.as_ref(), v.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parses `:status`, returning `None` if it is missing or not a valid code.
    pub fn status_code(&self) -> Option<http::StatusCode> {
        self.get(b":status")
            .and_then(|s| http::StatusCode::from_bytes(s).ok())
    }

    /// True for an extended CONNECT with `:protocol: webtransport`.
    pub fn is_webtransport_connect(&self) -> bool {
        self.get(b":method") == Some(&b"CONNECT"[..])
            && self.get(b":protocol") == Some(&b"webtransport"[..])
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderSet
where
    N: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let fields = iter
            .into_iter()
            .map(|(n, v)| {
                (
                    Bytes::copy_from_slice(n.as_ref()),
                    Bytes::copy_from_slice(v.as_ref()),
                )
            })
            .collect();

        Self { fields }
    }
}
