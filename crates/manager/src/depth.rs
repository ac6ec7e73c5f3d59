use derive_more::Display;

/// Scope of a listing, as carried by the WebDAV `Depth` header. `Display`
/// renders the header value.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Depth {
    /// The resource itself only.
    #[display("0")]
    Zero,
    /// The resource and its direct children.
    #[display("1")]
    One,
    /// The resource and everything below it.
    #[default]
    #[display("infinity")]
    Infinity,
}
impl Depth {
    /// Normalizes a raw header value; anything unrecognized (or absent) is
    /// [`Depth::Infinity`].
    ///
    /// ```
    /// use davcache_manager::Depth;
    /// assert_eq!(Depth::from_header(Some("1")), Depth::One);
    /// assert_eq!(Depth::from_header(Some(" Infinity ")), Depth::Infinity);
    /// assert_eq!(Depth::from_header(Some("2")), Depth::Infinity);
    /// assert_eq!(Depth::from_header(None), Depth::Infinity);
    /// ```
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("0") => Self::Zero,
            Some("1") => Self::One,
            _ => Self::Infinity,
        }
    }
}
