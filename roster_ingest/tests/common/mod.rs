//! Test fixtures: a hand-assembled workbook builder and in-memory store
//! doubles. The workbook is written part by part so tests can produce
//! encodings no writer library will emit, such as a drawing part whose
//! sheet relationship is missing, or media with no drawing metadata at all.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use roster_ingest::{BlobError, BlobStore, NewRecord, RecordStore, StoreError, StudentRecord};

/// A tagged blob with a valid PNG signature; the tag keeps fixtures
/// distinguishable by content.
pub fn png_bytes(tag: u8) -> Vec<u8> {
    let mut bytes = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x0D]);
    bytes.push(tag);
    bytes
}

pub struct FixtureImage {
    pub bytes: Vec<u8>,
    /// Absolute 0-based (row, col) anchor written into the drawing part.
    pub anchor: Option<(u32, u32)>,
}

pub struct WorkbookFixture {
    rows: Vec<Vec<String>>,
    images: Vec<FixtureImage>,
    link_drawing: bool,
    emit_drawing: bool,
}

impl WorkbookFixture {
    pub fn new<S: AsRef<str>>(rows: Vec<Vec<S>>) -> WorkbookFixture {
        WorkbookFixture {
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(|c| c.as_ref().to_string()).collect())
                .collect(),
            images: Vec::new(),
            link_drawing: true,
            emit_drawing: true,
        }
    }

    pub fn with_image(mut self, bytes: Vec<u8>, anchor: Option<(u32, u32)>) -> WorkbookFixture {
        self.images.push(FixtureImage { bytes, anchor });
        self
    }

    /// Drop the sheet-to-drawing relationship while keeping the drawing
    /// part itself, simulating a workbook with broken internal wiring.
    pub fn without_sheet_link(mut self) -> WorkbookFixture {
        self.link_drawing = false;
        self
    }

    /// Emit media files only, with no drawing metadata at all.
    pub fn without_drawing_parts(mut self) -> WorkbookFixture {
        self.emit_drawing = false;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut zipw = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = SimpleFileOptions::default();
        let add = |zipw: &mut ZipWriter<Cursor<Vec<u8>>>, name: &str, data: &[u8]| {
            zipw.start_file(name, opts).unwrap();
            zipw.write_all(data).unwrap();
        };

        add(&mut zipw, "[Content_Types].xml", CONTENT_TYPES.as_bytes());
        add(&mut zipw, "_rels/.rels", ROOT_RELS.as_bytes());
        add(&mut zipw, "xl/workbook.xml", WORKBOOK.as_bytes());
        add(&mut zipw, "xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes());
        add(&mut zipw, "xl/styles.xml", STYLES.as_bytes());

        let (shared, sheet) = self.sheet_parts();
        add(&mut zipw, "xl/sharedStrings.xml", shared.as_bytes());
        add(&mut zipw, "xl/worksheets/sheet1.xml", sheet.as_bytes());
        if self.link_drawing && self.emit_drawing && !self.images.is_empty() {
            add(
                &mut zipw,
                "xl/worksheets/_rels/sheet1.xml.rels",
                SHEET_RELS.as_bytes(),
            );
        }

        if self.emit_drawing && !self.images.is_empty() {
            let (drawing, drawing_rels) = self.drawing_parts();
            add(&mut zipw, "xl/drawings/drawing1.xml", drawing.as_bytes());
            add(
                &mut zipw,
                "xl/drawings/_rels/drawing1.xml.rels",
                drawing_rels.as_bytes(),
            );
        }
        for (i, img) in self.images.iter().enumerate() {
            add(&mut zipw, &format!("xl/media/image{}.png", i + 1), &img.bytes);
        }

        zipw.finish().unwrap().into_inner()
    }

    /// Shared strings and the worksheet, with every non-empty cell stored
    /// as a shared string so text survives exactly as written.
    fn sheet_parts(&self) -> (String, String) {
        let mut strings: Vec<String> = Vec::new();
        let mut sheet = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<worksheet \
             xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
             <sheetData>",
        );
        for (row_idx, row) in self.rows.iter().enumerate() {
            sheet.push_str(&format!("<row r=\"{}\">", row_idx + 1));
            for (col_idx, cell) in row.iter().enumerate() {
                if cell.is_empty() {
                    continue;
                }
                let string_idx = match strings.iter().position(|s| s == cell) {
                    Some(i) => i,
                    None => {
                        strings.push(cell.clone());
                        strings.len() - 1
                    }
                };
                sheet.push_str(&format!(
                    "<c r=\"{}{}\" t=\"s\"><v>{}</v></c>",
                    col_letter(col_idx),
                    row_idx + 1,
                    string_idx
                ));
            }
            sheet.push_str("</row>");
        }
        sheet.push_str("</sheetData>");
        if self.link_drawing && self.emit_drawing && !self.images.is_empty() {
            sheet.push_str("<drawing r:id=\"rId1\"/>");
        }
        sheet.push_str("</worksheet>");

        let mut shared = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<sst \
             xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
             count=\"{}\" uniqueCount=\"{}\">",
            strings.len(),
            strings.len()
        );
        for s in &strings {
            shared.push_str(&format!(
                "<si><t xml:space=\"preserve\">{}</t></si>",
                escape_xml(s)
            ));
        }
        shared.push_str("</sst>");
        (shared, sheet)
    }

    fn drawing_parts(&self) -> (String, String) {
        let mut drawing = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<xdr:wsDr \
             xmlns:xdr=\"http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing\" \
             xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" \
             xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">",
        );
        let mut rels = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<Relationships \
             xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">",
        );
        for (i, img) in self.images.iter().enumerate() {
            let rel_id = format!("rId{}", i + 1);
            if let Some((row, col)) = img.anchor {
                drawing.push_str(&format!(
                    "<xdr:oneCellAnchor><xdr:from><xdr:col>{col}</xdr:col><xdr:colOff>0</xdr:colOff>\
                     <xdr:row>{row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>\
                     <xdr:ext cx=\"190500\" cy=\"190500\"/>\
                     <xdr:pic><xdr:nvPicPr><xdr:cNvPr id=\"{id}\" name=\"Picture {id}\"/>\
                     <xdr:cNvPicPr/></xdr:nvPicPr>\
                     <xdr:blipFill><a:blip r:embed=\"{rel_id}\"/></xdr:blipFill>\
                     <xdr:spPr/></xdr:pic><xdr:clientData/></xdr:oneCellAnchor>",
                    col = col,
                    row = row,
                    id = i + 1,
                    rel_id = rel_id
                ));
            }
            rels.push_str(&format!(
                "<Relationship Id=\"{}\" \
                 Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/image\" \
                 Target=\"../media/image{}.png\"/>",
                rel_id,
                i + 1
            ));
        }
        drawing.push_str("</xdr:wsDr>");
        rels.push_str("</Relationships>");
        (drawing, rels)
    }
}

const CONTENT_TYPES: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\"><Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/><Default Extension=\"xml\" ContentType=\"application/xml\"/><Default Extension=\"png\" ContentType=\"image/png\"/><Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/><Override PartName=\"/xl/worksheets/sheet1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/><Override PartName=\"/xl/sharedStrings.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml\"/><Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/><Override PartName=\"/xl/drawings/drawing1.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.drawing+xml\"/></Types>";

const ROOT_RELS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\"><Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/></Relationships>";

const WORKBOOK: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<workbook xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\"><sheets><sheet name=\"Sheet1\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>";

const WORKBOOK_RELS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\"><Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet\" Target=\"worksheets/sheet1.xml\"/><Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings\" Target=\"sharedStrings.xml\"/><Relationship Id=\"rId3\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles\" Target=\"styles.xml\"/></Relationships>";

const SHEET_RELS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\"><Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing\" Target=\"../drawings/drawing1.xml\"/></Relationships>";

const STYLES: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<styleSheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><fonts count=\"1\"><font/></fonts><fills count=\"1\"><fill/></fills><borders count=\"1\"><border/></borders><cellStyleXfs count=\"1\"><xf/></cellStyleXfs><cellXfs count=\"1\"><xf/></cellXfs></styleSheet>";

fn col_letter(idx: usize) -> String {
    let mut s = String::new();
    let mut n = idx;
    loop {
        s.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// In-memory record store double with the same uniqueness backstop a real
/// backend enforces.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    pub records: Vec<StudentRecord>,
}

impl MemoryRecordStore {
    pub fn find(&self, identifier: &str) -> Option<&StudentRecord> {
        self.records.iter().find(|r| r.identifier == identifier)
    }
}

impl RecordStore for MemoryRecordStore {
    fn exists_by_identifier(&self, identifier: &str) -> Result<bool, StoreError> {
        Ok(self.records.iter().any(|r| r.identifier == identifier))
    }

    fn create(&mut self, fields: &NewRecord) -> Result<StudentRecord, StoreError> {
        if self.records.iter().any(|r| r.identifier == fields.identifier) {
            return Err(StoreError::DuplicateIdentifier {
                identifier: fields.identifier.clone(),
            });
        }
        let record = StudentRecord {
            id: format!("rec-{:06}", self.records.len() + 1),
            identifier: fields.identifier.clone(),
            name: fields.name.clone(),
            email: fields.email.clone(),
            phone: fields.phone.clone(),
            credential: fields.credential.clone(),
            image_url: None,
        };
        self.records.push(record.clone());
        Ok(record)
    }

    fn update_image_url(
        &mut self,
        record_id: &str,
        url: &str,
    ) -> Result<StudentRecord, StoreError> {
        match self.records.iter_mut().find(|r| r.id == record_id) {
            Some(record) => {
                record.image_url = Some(url.to_string());
                Ok(record.clone())
            }
            None => Err(StoreError::Backend {
                message: format!("no record with id {}", record_id),
            }),
        }
    }
}

/// In-memory blob store double; paths containing one of `fail_substrings`
/// fail their upload.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    pub uploads: Vec<(String, Vec<u8>)>,
    pub fail_substrings: Vec<String>,
}

impl BlobStore for MemoryBlobStore {
    fn upload(
        &mut self,
        bytes: &[u8],
        _content_type: &str,
        path: &str,
    ) -> Result<String, BlobError> {
        if self.fail_substrings.iter().any(|s| path.contains(s)) {
            return Err(BlobError::Upload {
                path: path.to_string(),
                message: "induced failure".to_string(),
            });
        }
        self.uploads.push((path.to_string(), bytes.to_vec()));
        Ok(format!("https://blobs.test/{}", path))
    }
}
