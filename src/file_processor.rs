//! Upload classification and text extraction. Extraction is best-effort by
//! contract: a failing parser turns into a placeholder string on the file
//! record, never a failed request.

use std::io::{Cursor, Read};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use calamine::{Reader as _, Xlsx};
use quick_xml::events::Event;

use crate::models::file::FileType;

/// Classify by filename extension first, then by content-type substrings.
/// Unrecognized files fall through to image.
pub fn classify(filename: &str, content_type: &str) -> FileType {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "pdf" => return FileType::Pdf,
        "docx" => return FileType::Docx,
        "xlsx" => return FileType::Xlsx,
        "png" | "jpg" | "jpeg" | "webp" => return FileType::Image,
        _ => {}
    }

    if content_type.contains("pdf") {
        FileType::Pdf
    } else if content_type.contains("word") || content_type.contains("document") {
        FileType::Docx
    } else if content_type.contains("sheet") || content_type.contains("excel") {
        FileType::Xlsx
    } else {
        FileType::Image
    }
}

/// Extract plain text for document types. Images carry no text. Extraction
/// errors are embedded in the returned string instead of propagating.
pub fn extract_text(bytes: &[u8], file_type: FileType) -> Option<String> {
    let result = match file_type {
        FileType::Pdf => extract_pdf_text(bytes),
        FileType::Docx => extract_docx_text(bytes),
        FileType::Xlsx => extract_xlsx_text(bytes),
        FileType::Image => return None,
    };

    match result {
        Ok(text) => Some(text),
        Err(e) => Some(format!("[Error extracting text: {}]", e)),
    }
}

/// Validate the bytes decode as an image and return a data URI suitable for
/// inline transport to the completion API.
pub fn encode_image(bytes: &[u8], content_type: &str) -> Result<String, String> {
    image::load_from_memory(bytes).map_err(|e| format!("invalid image: {}", e))?;
    Ok(format!(
        "data:{};base64,{}",
        content_type,
        BASE64.encode(bytes)
    ))
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| e.to_string())?;
    let parts: Vec<String> = pages
        .into_iter()
        .filter(|page| !page.trim().is_empty())
        .collect();
    Ok(parts.join("\n\n"))
}

// DOCX is a zip container; the document body lives in word/document.xml with
// one w:p element per paragraph.
fn extract_docx_text(bytes: &[u8]) -> Result<String, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?
        .read_to_string(&mut xml)
        .map_err(|e| e.to_string())?;

    let mut reader = quick_xml::Reader::from_str(&xml);
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(t)) => {
                current.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"w:p" => {
                if !current.trim().is_empty() {
                    paragraphs.push(current.trim().to_string());
                }
                current.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }

    Ok(paragraphs.join("\n\n"))
}

fn extract_xlsx_text(bytes: &[u8]) -> Result<String, String> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let sheet_names = workbook.sheet_names().to_owned();

    let mut parts = Vec::new();
    for name in sheet_names {
        let range = workbook.worksheet_range(&name).map_err(|e| e.to_string())?;
        let rows: Vec<String> = range
            .rows()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.to_string())
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect();
        if !rows.is_empty() {
            parts.push(format!("Sheet: {}\n{}", name, rows.join("\n")));
        }
    }

    Ok(parts.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn classifies_by_extension_regardless_of_content_type() {
        assert_eq!(classify("report.pdf", "application/octet-stream"), FileType::Pdf);
        assert_eq!(classify("notes.DOCX", "text/plain"), FileType::Docx);
        assert_eq!(classify("data.xlsx", "application/vnd.ms-excel"), FileType::Xlsx);
        assert_eq!(classify("photo.png", "image/png"), FileType::Image);
        assert_eq!(classify("photo.JPEG", ""), FileType::Image);
    }

    #[test]
    fn falls_back_to_content_type_then_image() {
        assert_eq!(classify("upload.bin", "application/pdf"), FileType::Pdf);
        assert_eq!(classify("upload.bin", "application/msword"), FileType::Docx);
        assert_eq!(classify("upload.bin", "application/vnd.ms-excel"), FileType::Xlsx);
        assert_eq!(classify("upload.bin", "application/octet-stream"), FileType::Image);
        assert_eq!(classify("noextension", ""), FileType::Image);
    }

    #[test]
    fn corrupt_pdf_yields_placeholder_not_error() {
        let text = extract_text(b"definitely not a pdf", FileType::Pdf);
        let text = text.expect("placeholder expected");
        assert!(text.starts_with("[Error extracting text:"));
    }

    #[test]
    fn images_have_no_extracted_text() {
        assert_eq!(extract_text(&[0xFF, 0xD8], FileType::Image), None);
    }

    #[test]
    fn extracts_docx_paragraphs() {
        let document = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
<w:body>
<w:p><w:r><w:t>First paragraph.</w:t></w:r></w:p>
<w:p><w:r><w:t>   </w:t></w:r></w:p>
<w:p><w:r><w:t>Second paragraph.</w:t></w:r></w:p>
</w:body>
</w:document>"#;

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document.as_bytes()).unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let text = extract_text(&bytes, FileType::Docx).unwrap();
        assert_eq!(text, "First paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn extracts_xlsx_rows_with_sheet_header() {
        let bytes = build_test_xlsx();
        let text = extract_text(&bytes, FileType::Xlsx).unwrap();
        assert_eq!(text, "Sheet: Data\nname | qty\nwidget | 3");
    }

    #[test]
    fn encodes_valid_image_as_data_uri() {
        let mut png = Vec::new();
        image::RgbImage::new(1, 1)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let uri = encode_image(&png, "image/png").unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));

        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();
        assert_eq!(BASE64.decode(payload).unwrap(), png);
    }

    #[test]
    fn rejects_bytes_that_are_not_an_image() {
        assert!(encode_image(b"not an image", "image/png").is_err());
    }

    fn build_test_xlsx() -> Vec<u8> {
        let content_types = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#;
        let root_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#;
        let workbook = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="Data" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#;
        let workbook_rels = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#;
        let sheet = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>name</t></is></c><c r="B1" t="inlineStr"><is><t>qty</t></is></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>widget</t></is></c><c r="B2"><v>3</v></c></row>
</sheetData>
</worksheet>"#;

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (path, body) in [
            ("[Content_Types].xml", content_types),
            ("_rels/.rels", root_rels),
            ("xl/workbook.xml", workbook),
            ("xl/_rels/workbook.xml.rels", workbook_rels),
            ("xl/worksheets/sheet1.xml", sheet),
        ] {
            writer.start_file(path, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}
