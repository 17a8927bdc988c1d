use crate::constants;
use http::header::{self, HeaderMap};
use regex::bytes::Regex;

#[derive(Debug, Clone, Default)]
pub(crate) struct ContentDisposition {
    pub(crate) part_name: Option<String>,
    pub(crate) file_name: Option<String>,
}

impl ContentDisposition {
    pub(crate) fn parse(headers: &HeaderMap) -> ContentDisposition {
        let content_disposition = headers.get(header::CONTENT_DISPOSITION).map(|val| val.as_bytes());

        let extract = |re: &Regex| {
            content_disposition
                .and_then(|val| re.captures(val))
                .and_then(|cap| cap.get(1))
                .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
                .map(String::from)
        };

        ContentDisposition {
            part_name: extract(&*constants::CONTENT_DISPOSITION_PART_NAME_RE),
            file_name: extract(&*constants::CONTENT_DISPOSITION_FILE_NAME_RE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    fn parse(value: &'static str) -> ContentDisposition {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static(value));
        ContentDisposition::parse(&headers)
    }

    #[test]
    fn test_part_name() {
        assert_eq!(parse(r#"form-data; name="my_field""#).part_name.as_deref(), Some("my_field"));
        assert_eq!(parse(r#"form-data; name="my field""#).part_name.as_deref(), Some("my field"));

        let cd = parse(r#"form-data; filename="file abc.txt"; name="my_field""#);
        assert_eq!(cd.part_name.as_deref(), Some("my_field"));
        assert_eq!(cd.file_name.as_deref(), Some("file abc.txt"));
    }

    #[test]
    fn test_file_name() {
        let cd = parse(r#"form-data; name="my_field"; filename="file_name.txt""#);
        assert_eq!(cd.part_name.as_deref(), Some("my_field"));
        assert_eq!(cd.file_name.as_deref(), Some("file_name.txt"));

        let cd = parse(r#"form-data; filename="file-name.txt""#);
        assert_eq!(cd.part_name, None);
        assert_eq!(cd.file_name.as_deref(), Some("file-name.txt"));
    }

    #[test]
    fn test_empty_and_non_ascii_values() {
        assert_eq!(parse(r#"form-data; name="""#).part_name, None);

        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_bytes("form-data; name=\"你好\"; filename=\"কখগ.txt\"".as_bytes()).unwrap();
        headers.insert(header::CONTENT_DISPOSITION, value);

        let cd = ContentDisposition::parse(&headers);
        assert_eq!(cd.part_name.as_deref(), Some("你好"));
        assert_eq!(cd.file_name.as_deref(), Some("কখগ.txt"));
    }

    #[test]
    fn test_missing_header() {
        let cd = ContentDisposition::parse(&HeaderMap::new());
        assert!(cd.part_name.is_none());
        assert!(cd.file_name.is_none());
    }
}
