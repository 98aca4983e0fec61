//! Field extraction from directory responses.
//!
//! Responses are small XML documents; we only ever need the text of one nested
//! element, so a couple of regexes stand in for a full parser.

use regex::Regex;

use crate::{errors::Error, Result};

/// Separator used inside a directory list field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delimiter {
    Colon,
    Comma,
}

impl Delimiter {
    fn as_char(self) -> char {
        match self {
            Delimiter::Colon => ':',
            Delimiter::Comma => ',',
        }
    }
}

/// Text of the element at `path` (outermost first), e.g. `["REGION", "NATIONS"]`.
pub fn element_text(body: &str, path: &[&str]) -> Result<String> {
    let mut scope = body;
    for tag in path {
        scope = inner(scope, tag)?.ok_or_else(|| {
            Error::Protocol(format!("missing <{}> in response", path.join("/")))
        })?;
    }
    Ok(scope.trim().to_string())
}

/// Approvals field of the proposal whose `id` attribute equals `proposal_id`.
///
/// `Ok(None)` when no such proposal is listed.
pub fn proposal_approvals(body: &str, proposal_id: &str) -> Result<Option<String>> {
    let re = Regex::new(&format!(
        r#"(?s)<PROPOSAL\b[^>]*\bid\s*=\s*"{}"[^>]*>(.*?)</PROPOSAL>"#,
        regex::escape(proposal_id)
    ))
    .map_err(|e| Error::Protocol(format!("bad proposal pattern: {e}")))?;

    let Some(caps) = re.captures(body) else {
        return Ok(None);
    };
    let proposal = caps.get(1).map_or("", |m| m.as_str());
    element_text(proposal, &["APPROVALS"]).map(Some)
}

/// Split a list field into identifiers, dropping blanks.
pub fn split_list(text: &str, delimiter: Delimiter) -> Vec<String> {
    text.split(delimiter.as_char())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn inner<'a>(scope: &'a str, tag: &str) -> Result<Option<&'a str>> {
    let tag = regex::escape(tag);
    let re = Regex::new(&format!(r"(?s)<{tag}\b[^>]*?(?:/>|>(.*?)</{tag}>)"))
        .map_err(|e| Error::Protocol(format!("bad element pattern: {e}")))?;
    Ok(re
        .captures(scope)
        .map(|caps| caps.get(1).map_or("", |m| m.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nested_element_text() {
        let body = r#"<REGION id="lazarus"><NATIONS>a:b c:d</NATIONS></REGION>"#;
        let text = element_text(body, &["REGION", "NATIONS"]).unwrap();
        assert_eq!(
            split_list(&text, Delimiter::Colon),
            vec!["a", "b c", "d"]
        );
    }

    #[test]
    fn empty_and_self_closing_elements_yield_no_items() {
        let body = "<WA council=\"1\"><MEMBERS></MEMBERS></WA>";
        let text = element_text(body, &["WA", "MEMBERS"]).unwrap();
        assert!(split_list(&text, Delimiter::Comma).is_empty());

        let body = "<WA council=\"1\"><DELEGATES/></WA>";
        let text = element_text(body, &["WA", "DELEGATES"]).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn missing_element_is_a_protocol_error() {
        let err = element_text("<WORLD></WORLD>", &["WORLD", "NEWNATIONS"]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn does_not_confuse_prefixed_tags() {
        let body = "<WA><MEMBERSHIP>x</MEMBERSHIP><MEMBERS>y,z</MEMBERS></WA>";
        let text = element_text(body, &["WA", "MEMBERS"]).unwrap();
        assert_eq!(text, "y,z");
    }

    #[test]
    fn finds_proposal_by_id() {
        let body = r#"<WA council="1"><PROPOSALS>
<PROPOSAL id="first_1"><APPROVALS>a:b</APPROVALS></PROPOSAL>
<PROPOSAL id="second_2"><APPROVALS>c</APPROVALS></PROPOSAL>
</PROPOSALS></WA>"#;
        assert_eq!(
            proposal_approvals(body, "second_2").unwrap().as_deref(),
            Some("c")
        );
        assert_eq!(proposal_approvals(body, "third_3").unwrap(), None);
    }
}
