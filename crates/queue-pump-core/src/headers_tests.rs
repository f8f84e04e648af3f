use super::*;
use chrono::TimeZone;

fn due() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap()
}

#[test]
fn test_reserved_prefix() {
    assert!(is_reserved(TIMEOUT_DESTINATION));
    assert!(is_reserved(EXCEPTION_STACK_TRACE));
    assert!(!is_reserved("app.tenant"));
}

#[test]
fn test_utc_values_parse_back() {
    let value = format_utc(due());
    assert_eq!(value, "2026-03-01T12:30:00.000000Z");
    assert_eq!(parse_utc("key", &value).unwrap(), due());
}

/// Offsets are normalized to UTC.
#[test]
fn test_offset_values_are_converted_to_utc() {
    let parsed = parse_utc("key", "2026-03-01T14:30:00+02:00").unwrap();
    assert_eq!(parsed, due());
}

mod timeout_headers {
    use super::*;

    #[test]
    fn test_apply_then_extract() {
        let timeout = TimeoutHeaders {
            destination: "orders@node-a".parse().unwrap(),
            due: due(),
        };
        let mut headers = Headers::new();
        timeout.apply(&mut headers);

        assert_eq!(TimeoutHeaders::extract(&headers).unwrap(), timeout);
    }

    #[test]
    fn test_missing_headers_are_reported() {
        let mut headers = Headers::new();
        assert_eq!(
            TimeoutHeaders::extract(&headers),
            Err(HeaderError::Missing {
                key: TIMEOUT_DESTINATION.to_string()
            })
        );

        headers.insert(TIMEOUT_DESTINATION.to_string(), "orders".to_string());
        assert_eq!(
            TimeoutHeaders::extract(&headers),
            Err(HeaderError::Missing {
                key: TIMEOUT_DUE_UTC.to_string()
            })
        );
    }

    #[test]
    fn test_malformed_values_are_invalid() {
        let mut headers = Headers::new();
        headers.insert(TIMEOUT_DESTINATION.to_string(), "orders".to_string());
        headers.insert(TIMEOUT_DUE_UTC.to_string(), "tomorrow".to_string());

        assert!(matches!(
            TimeoutHeaders::extract(&headers),
            Err(HeaderError::Invalid { key, .. }) if key == TIMEOUT_DUE_UTC
        ));

        headers.insert(TIMEOUT_DESTINATION.to_string(), "bad queue".to_string());
        assert!(matches!(
            TimeoutHeaders::extract(&headers),
            Err(HeaderError::Invalid { key, .. }) if key == TIMEOUT_DESTINATION
        ));
    }

    #[test]
    fn test_strip_keeps_application_headers() {
        let mut headers = Headers::new();
        TimeoutHeaders {
            destination: "orders".parse().unwrap(),
            due: due(),
        }
        .apply(&mut headers);
        headers.insert("app.tenant".to_string(), "contoso".to_string());

        TimeoutHeaders::strip(&mut headers);

        assert_eq!(headers.len(), 1);
        assert_eq!(headers["app.tenant"], "contoso");
    }
}
