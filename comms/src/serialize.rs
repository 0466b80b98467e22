pub trait Serialize<'a> {
    /// Writes the header into `buf` and returns the data to be sent as is, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
