use bytes::Bytes;

/// Size of the padded property in the default body.
pub const DEFAULT_PAYLOAD_PADDING: usize = 13 * 1024;

const PREFIX: &str = r#"<?xml version="1.0"?>
<MyMessage xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema"
            xmlns="http://tempuri.net/">
   <MyProperty>"#;
const SUFFIX: &str = "</MyProperty>\n</MyMessage>";

/// Message body shared by every dispatch of a run. Cloning only bumps a
/// reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    body: Bytes,
}

impl Payload {
    /// XML body whose single property holds `padding` filler characters.
    pub fn xml(padding: usize) -> Self {
        let mut body = String::with_capacity(PREFIX.len() + padding + SUFFIX.len());
        body.push_str(PREFIX);
        body.extend(std::iter::repeat_n('a', padding));
        body.push_str(SUFFIX);
        Self {
            body: Bytes::from(body),
        }
    }

    pub fn bytes(&self) -> Bytes {
        self.body.clone()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::xml(DEFAULT_PAYLOAD_PADDING)
    }
}
