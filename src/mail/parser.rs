//! MIME attachment extraction

use mailparse::{MailHeaderMap, ParsedMail};

use super::MailError;

/// A decoded attachment
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// The parts of a message the poller cares about
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub subject: String,
    pub attachments: Vec<Attachment>,
}

/// Parse a raw RFC 822 message and collect its attachments.
///
/// Multipart containers are walked, parts without a Content-Disposition
/// header are skipped, and only parts carrying a filename are kept.
pub fn extract_attachments(raw: &[u8]) -> Result<ParsedMessage, MailError> {
    let mail = mailparse::parse_mail(raw)?;

    let subject = mail
        .headers
        .get_first_value("Subject")
        .unwrap_or_default();

    let mut attachments = Vec::new();
    collect_attachments(&mail, &mut attachments)?;

    Ok(ParsedMessage {
        subject,
        attachments,
    })
}

fn collect_attachments(part: &ParsedMail, out: &mut Vec<Attachment>) -> Result<(), MailError> {
    if part.ctype.mimetype.starts_with("multipart/") {
        for sub in &part.subparts {
            collect_attachments(sub, out)?;
        }
        return Ok(());
    }

    if part.headers.get_first_value("Content-Disposition").is_none() {
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let file_name = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    if let Some(file_name) = file_name {
        out.push(Attachment {
            file_name,
            content_type: part.ctype.mimetype.clone(),
            data: part.get_body_raw()?,
        });
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn sample_message(png: &[u8]) -> Vec<u8> {
    use base64::Engine;

    let encoded = base64::engine::general_purpose::STANDARD.encode(png);
    format!(
        "From: billing@example.com\r\n\
         To: ap@example.com\r\n\
         Subject: =?UTF-8?B?SW52b2ljZSBNYXJjaA==?=\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
         \r\n\
         --XYZ\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Please find attached.\r\n\
         --XYZ\r\n\
         Content-Type: image/png; name=\"logo.png\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         {encoded}\r\n\
         --XYZ\r\n\
         Content-Type: image/png; name=\"scan.png\"\r\n\
         Content-Disposition: attachment; filename=\"scan.png\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         {encoded}\r\n\
         --XYZ\r\n\
         Content-Type: application/octet-stream\r\n\
         Content-Disposition: attachment; filename=\"terms.docx\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         UEsDBA==\r\n\
         --XYZ--\r\n"
    )
    .into_bytes()
}
