use crate::error::HttpError;
use crate::request::WireRequest;
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderValue};

/// One file sent as a `multipart/form-data` part.
#[derive(Debug, Clone)]
pub struct FileMultipart {
    pub data: Bytes,
    pub file_name: String,
    pub mime_type: mime::Mime,
    /// Form field name of the file part
    pub part_name: String,
}

impl FileMultipart {
    #[must_use]
    pub fn new(
        data: impl Into<Bytes>,
        file_name: impl Into<String>,
        mime_type: mime::Mime,
        part_name: impl Into<String>,
    ) -> Self {
        Self {
            data: data.into(),
            file_name: file_name.into(),
            mime_type,
            part_name: part_name.into(),
        }
    }
}

/// Payload replacing the encoded request body.
#[derive(Debug, Clone)]
pub enum UploadBody {
    /// Raw bytes sent as-is
    Data(Bytes),
    /// A file plus string form fields, as `multipart/form-data`
    File(FileMultipart),
}

impl UploadBody {
    /// Number of bytes the payload contributes before encoding.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Data(data) => data.len(),
            Self::File(file) => file.data.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn apply<'a>(
    mut request: WireRequest,
    body: &UploadBody,
    fields: impl Iterator<Item = (&'a str, &'a str)>,
) -> Result<WireRequest, HttpError> {
    match body {
        UploadBody::Data(data) => {
            *request.body_mut() = data.clone();
        }
        UploadBody::File(file) => {
            let boundary = format!("transport-boundary-{:016x}", rand::random::<u64>());
            let content_type =
                HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}"))?;
            request.headers_mut().insert(CONTENT_TYPE, content_type);
            *request.body_mut() = encode_multipart(&boundary, file, fields);
        }
    }
    Ok(request)
}

fn encode_multipart<'a>(
    boundary: &str,
    file: &FileMultipart,
    fields: impl Iterator<Item = (&'a str, &'a str)>,
) -> Bytes {
    let mut body = BytesMut::with_capacity(file.data.len() + 256);

    body.put_slice(format!("--{boundary}\r\n").as_bytes());
    body.put_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            quoted(&file.part_name),
            quoted(&file.file_name)
        )
        .as_bytes(),
    );
    body.put_slice(format!("Content-Type: {}\r\n\r\n", file.mime_type).as_bytes());
    body.put_slice(&file.data);
    body.put_slice(b"\r\n");

    for (name, value) in fields {
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        body.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                quoted(name)
            )
            .as_bytes(),
        );
        body.put_slice(value.as_bytes());
        body.put_slice(b"\r\n");
    }

    body.put_slice(format!("--{boundary}--\r\n").as_bytes());
    body.freeze()
}

fn quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn wire() -> WireRequest {
        http::Request::builder()
            .method(http::Method::POST)
            .uri("http://example.com/upload")
            .body(Bytes::from_static(b"{\"encoded\":true}"))
            .unwrap()
    }

    fn boundary_of(request: &WireRequest) -> String {
        let content_type = request.headers()[CONTENT_TYPE].to_str().unwrap();
        content_type
            .strip_prefix("multipart/form-data; boundary=")
            .unwrap()
            .to_owned()
    }

    #[test]
    fn test_data_upload_replaces_body() {
        let request = apply(
            wire(),
            &UploadBody::Data(Bytes::from_static(b"raw")),
            std::iter::empty(),
        )
        .unwrap();

        assert_eq!(request.body().as_ref(), b"raw");
        assert!(request.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_file_upload_writes_parts() {
        let file = FileMultipart::new(
            Bytes::from_static(b"hello"),
            "greeting.txt",
            mime::TEXT_PLAIN,
            "file",
        );

        let request = apply(
            wire(),
            &UploadBody::File(file),
            [("title", "Greeting")].into_iter(),
        )
        .unwrap();

        let boundary = boundary_of(&request);
        let body = String::from_utf8(request.body().to_vec()).unwrap();
        let expected = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"greeting.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             hello\r\n\
             --{boundary}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             Greeting\r\n\
             --{boundary}--\r\n"
        );
        assert_eq!(body, expected);
    }

    #[test]
    fn test_boundaries_differ_between_uploads() {
        let file = UploadBody::File(FileMultipart::new(
            Bytes::new(),
            "a.bin",
            mime::APPLICATION_OCTET_STREAM,
            "file",
        ));

        let first = apply(wire(), &file, std::iter::empty()).unwrap();
        let second = apply(wire(), &file, std::iter::empty()).unwrap();

        assert_ne!(boundary_of(&first), boundary_of(&second));
    }

    #[test]
    fn test_part_names_are_escaped() {
        assert_eq!(quoted("a\"b\r\nc"), "a%22b%0D%0Ac");
    }
}
