#![cfg(test)]

use crate::{
    AppendError, AppendOptions, BatchRow, CellValue, XlsxEditor, append_batch, append_many,
    last_recorded_key, scan_bytes,
};
use anyhow::Result;
use pretty_assertions::assert_eq;
use roxmltree::Document;
use std::io::{Cursor, Read, Write};
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::FileOptions};

/* ============================== FIXTURE =================================== */

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";

const HEADERS: [&str; 16] = [
    "Date", "Value_1", "Value_2", "Value_3", "Value_4", "Value_5", "Value_6", "Mean", "Range",
    "Mean CL", "Mean UCL", "Mean LCL", "Range CL", "Range UCL", "Range LCL", "WO No.",
];

const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><numFmts count="1"><numFmt numFmtId="164" formatCode="0.000"/></numFmts><fonts count="2"><font><sz val="11"/><color theme="1"/><name val="Calibri"/><family val="2"/><scheme val="minor"/></font><font><b/><sz val="10"/><name val="Arial"/></font></fonts><fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills><borders count="2"><border><left/><right/><top/><bottom/><diagonal/></border><border><left style="thin"/><right style="thin"/><top style="thin"/><bottom style="thin"/><diagonal/></border></borders><cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs><cellXfs count="6"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/><xf numFmtId="0" fontId="1" fillId="0" borderId="1" xfId="0" applyFont="1" applyBorder="1"/><xf numFmtId="0" fontId="0" fillId="0" borderId="1" xfId="0" applyBorder="1" applyAlignment="1"><alignment horizontal="center"/></xf><xf numFmtId="2" fontId="0" fillId="0" borderId="1" xfId="0" applyNumberFormat="1" applyBorder="1"/><xf numFmtId="164" fontId="0" fillId="0" borderId="1" xfId="0" applyNumberFormat="1" applyBorder="1"/><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0" applyAlignment="1"><alignment wrapText="1"/></xf></cellXfs><cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles></styleSheet>"#;

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/worksheets/sheet2.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/worksheets/sheet3.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/><Override PartName="/xl/drawings/drawing1.xml" ContentType="application/vnd.openxmlformats-officedocument.drawing+xml"/><Override PartName="/xl/charts/chart1.xml" ContentType="application/vnd.openxmlformats-officedocument.drawingml.chart+xml"/><Override PartName="/xl/charts/chart2.xml" ContentType="application/vnd.openxmlformats-officedocument.drawingml.chart+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView activeTab="2"/></bookViews><sheets><sheet name="Archive" sheetId="1" state="hidden" r:id="rId1"/><sheet name="Notes" sheetId="2" r:id="rId2"/><sheet name="Data" sheetId="3" r:id="rId3"/></sheets><calcPr calcId="191029"/></workbook>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet2.xml"/><Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet3.xml"/><Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/><Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#;

const PLAIN_SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>memo</t></is></c></row></sheetData></worksheet>"#;

const SHEET_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/></Relationships>"#;

const DRAWING_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/chart" Target="../charts/chart2.xml"/><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/chart" Target="../charts/chart1.xml"/></Relationships>"#;

const ONE_CHART_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/chart" Target="../charts/chart1.xml"/></Relationships>"#;

fn anchor(id: u32, rid: &str, from_row: u32) -> String {
    format!(
        r#"<xdr:twoCellAnchor><xdr:from><xdr:col>17</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{from_row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:to><xdr:col>27</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to><xdr:graphicFrame macro=""><xdr:nvGraphicFramePr><xdr:cNvPr id="{id}" name="Chart {id}"/><xdr:cNvGraphicFramePr/></xdr:nvGraphicFramePr><xdr:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/></xdr:xfrm><a:graphic><a:graphicData uri="http://schemas.openxmlformats.org/drawingml/2006/chart"><c:chart xmlns:c="http://schemas.openxmlformats.org/drawingml/2006/chart" r:id="{rid}"/></a:graphicData></a:graphic></xdr:graphicFrame><xdr:clientData/></xdr:twoCellAnchor>"#,
        from_row + 15
    )
}

fn drawing(anchors: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">{}</xdr:wsDr>"#,
        anchors.concat()
    )
}

fn chart(title: &str, cols: [&str; 4], last_row: u32) -> String {
    let series: String = cols
        .iter()
        .enumerate()
        .map(|(i, col)| {
            format!(
                r#"<c:ser><c:idx val="{i}"/><c:order val="{i}"/><c:tx><c:strRef><c:f>'Data'!${col}$1</c:f></c:strRef></c:tx><c:spPr><a:ln w="19050"/></c:spPr><c:marker><c:symbol val="none"/></c:marker><c:cat><c:strRef><c:f>'Data'!$A$2:$A${last_row}</c:f></c:strRef></c:cat><c:val><c:numRef><c:f>'Data'!${col}$2:${col}${last_row}</c:f></c:numRef></c:val><c:smooth val="0"/></c:ser>"#
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<c:chartSpace xmlns:c="http://schemas.openxmlformats.org/drawingml/2006/chart" xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"><c:chart><c:title><c:tx><c:rich><a:bodyPr/><a:p><a:r><a:t>{title}</a:t></a:r></a:p></c:rich></c:tx><c:overlay val="0"/></c:title><c:plotArea><c:layout/><c:lineChart><c:grouping val="standard"/><c:varyColors val="0"/>{series}<c:marker val="1"/><c:axId val="10"/><c:axId val="20"/></c:lineChart><c:catAx><c:axId val="10"/><c:crossAx val="20"/></c:catAx><c:valAx><c:axId val="20"/><c:title><c:tx><c:rich><a:bodyPr/><a:p><a:r><a:t>kgf</a:t></a:r></a:p></c:rich></c:tx></c:title><c:crossAx val="10"/></c:valAx></c:plotArea></c:chart></c:chartSpace>"#
    )
}

/// Keys of rows 2..=11: one record per day for Jan 1–7, then three on Jan 8.
fn fixture_keys() -> Vec<String> {
    let mut keys: Vec<String> = (1..=7).map(|d| format!("2024/01/{d:02}-01")).collect();
    keys.extend((1..=3).map(|s| format!("2024/01/08-{s:02}")));
    keys
}

fn data_row(r: u32, key_index: usize) -> String {
    let mut cells = format!(r#"<c r="A{r}" s="2" t="s"><v>{key_index}</v></c>"#);
    for (k, col) in ["B", "C", "D", "E", "F", "G"].iter().enumerate() {
        cells.push_str(&format!(r#"<c r="{col}{r}" s="3"><v>{}</v></c>"#, r as usize + k));
    }
    cells.push_str(&format!(
        r#"<c r="H{r}" s="4"><f>AVERAGE(B{r}:G{r})</f><v>{}</v></c><c r="I{r}" s="4"><f>MAX(B{r}:G{r})-MIN(B{r}:G{r})</f><v>5</v></c>"#,
        r as f64 + 2.5
    ));
    cells.push_str(&format!(
        r#"<c r="J{r}" s="4"><f>AVERAGE($H$2:$H$11)</f><v>9</v></c><c r="K{r}" s="4"><v>12.5</v></c><c r="L{r}" s="4"><v>5.5</v></c><c r="M{r}" s="4"><v>5</v></c><c r="N{r}" s="4"><v>10.5</v></c><c r="O{r}" s="4"><v>0</v></c>"#
    ));
    cells.push_str(&format!(r#"<c r="P{r}" s="5" t="inlineStr"><is><t>WO-{r}</t></is></c>"#));
    format!(r#"<row r="{r}" spans="1:16" ht="20.25" customHeight="1">{cells}</row>"#)
}

fn header_row() -> String {
    let cells: String = HEADERS
        .iter()
        .enumerate()
        .map(|(i, _)| format!(r#"<c r="{}1" s="1" t="s"><v>{i}</v></c>"#, crate::read_part::column_name(i as u32 + 1)))
        .collect();
    format!(r#"<row r="1" ht="30" customHeight="1">{cells}</row>"#)
}

fn data_sheet(rows: &str, dimension: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><dimension ref="{dimension}"/><sheetViews><sheetView workbookViewId="0"/></sheetViews><sheetFormatPr defaultRowHeight="15"/><sheetData>{rows}</sheetData><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/><drawing r:id="rId1"/></worksheet>"#
    )
}

fn shared_strings(extra: &[String]) -> String {
    let items: String = HEADERS
        .iter()
        .map(|h| h.to_string())
        .chain(extra.iter().cloned())
        .map(|s| format!("<si><t>{s}</t></si>"))
        .collect();
    let n = HEADERS.len() + extra.len();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{n}" uniqueCount="{n}">{items}</sst>"#
    )
}

fn zip_bytes(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let cursor = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(cursor);
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in parts {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// Charts anchored on the data sheet.
#[derive(Clone, Copy)]
enum Charts {
    None,
    MeanOnly,
    Both,
}

fn package(sheet3: &str, shared: &str) -> Vec<u8> {
    package_with(sheet3, shared, STYLES, Charts::Both)
}

fn package_with(sheet3: &str, shared: &str, styles: &str, charts: Charts) -> Vec<u8> {
    let mut parts: Vec<(&str, Vec<u8>)> = vec![
        ("[Content_Types].xml", CONTENT_TYPES.into()),
        ("_rels/.rels", ROOT_RELS.into()),
        ("docProps/app.xml", b"<Properties/>".to_vec()),
        ("xl/workbook.xml", WORKBOOK.into()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.into()),
        ("xl/styles.xml", styles.into()),
        ("xl/sharedStrings.xml", shared.into()),
        ("xl/worksheets/sheet1.xml", PLAIN_SHEET.into()),
        ("xl/worksheets/sheet2.xml", PLAIN_SHEET.into()),
    ];
    let mean = chart("X-bar chart", ["H", "J", "K", "L"], 11);
    let range = chart("R chart", ["I", "M", "N", "O"], 11);
    match charts {
        Charts::None => {
            parts.push(("xl/worksheets/sheet3.xml", sheet3.replace(r#"<drawing r:id="rId1"/>"#, "").into()));
        }
        Charts::MeanOnly => {
            let drawn: [(&str, Vec<u8>); 5] = [
                ("xl/worksheets/sheet3.xml", sheet3.into()),
                ("xl/worksheets/_rels/sheet3.xml.rels", SHEET_RELS.into()),
                ("xl/drawings/drawing1.xml", drawing(&[anchor(2, "rId1", 1)]).into()),
                ("xl/drawings/_rels/drawing1.xml.rels", ONE_CHART_RELS.into()),
                ("xl/charts/chart1.xml", mean.into()),
            ];
            parts.extend(drawn);
        }
        Charts::Both => {
            let drawn: [(&str, Vec<u8>); 6] = [
                ("xl/worksheets/sheet3.xml", sheet3.into()),
                ("xl/worksheets/_rels/sheet3.xml.rels", SHEET_RELS.into()),
                ("xl/drawings/drawing1.xml", drawing(&[anchor(2, "rId1", 1), anchor(3, "rId2", 18)]).into()),
                ("xl/drawings/_rels/drawing1.xml.rels", DRAWING_RELS.into()),
                ("xl/charts/chart1.xml", mean.into()),
                ("xl/charts/chart2.xml", range.into()),
            ];
            parts.extend(drawn);
        }
    }
    let refs: Vec<(&str, &[u8])> = parts.iter().map(|(n, b)| (*n, b.as_slice())).collect();
    zip_bytes(&refs)
}

/// Header and ten records in rows 2..=11.
fn records() -> String {
    let mut rows = header_row();
    for r in 2..=11u32 {
        rows.push_str(&data_row(r, HEADERS.len() + (r as usize - 2)));
    }
    rows
}

/// Header, ten records (rows 2..=11) and a formatted but empty row 12.
fn template() -> Vec<u8> {
    let mut rows = records();
    rows.push_str(r#"<row r="12" ht="15"><c r="A12" s="2"/><c r="Q12" s="3"><v>99</v></c></row>"#);
    package(&data_sheet(&rows, "A1:Q12"), &shared_strings(&fixture_keys()))
}

fn header_only() -> Vec<u8> {
    package(&data_sheet(&header_row(), "A1:P1"), &shared_strings(&[]))
}

fn part_names(bytes: &[u8]) -> Vec<String> {
    let zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = zip.file_names().map(str::to_owned).collect();
    names.sort();
    names
}

fn part(bytes: &[u8], name: &str) -> String {
    let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut s = String::new();
    zip.by_name(name).unwrap().read_to_string(&mut s).unwrap();
    s
}

fn six(values: [&str; 6]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn row(date: &str, owner: &str) -> BatchRow {
    BatchRow {
        date: date.into(),
        values: six(["1", "2", "3", "4", "5", "6"]),
        owner: owner.into(),
    }
}

fn chart_formulas(xml: &str) -> Vec<String> {
    let doc = Document::parse(xml).unwrap();
    doc.descendants()
        .filter(|n| n.tag_name().name() == "f")
        .filter_map(|n| n.text())
        .map(str::to_owned)
        .collect()
}

fn text(s: &str) -> CellValue {
    CellValue::Text(s.into())
}

/* =============================== TESTS ==================================== */

#[test]
fn scan_lists_sheets_in_order() -> Result<()> {
    assert_eq!(scan_bytes(&template())?, vec!["Archive", "Notes", "Data"]);
    Ok(())
}

#[test]
fn missing_sheet_falls_back_to_first_visible() -> Result<()> {
    let editor = XlsxEditor::open_bytes(template(), "Measurements")?;
    assert_eq!(editor.sheet_name(), "Notes");
    assert_eq!(editor.sheet_path(), "xl/worksheets/sheet2.xml");

    let editor = XlsxEditor::open_bytes(template(), "Data")?;
    assert_eq!(editor.sheet_name(), "Data");
    assert_eq!(editor.last_data_row()?, 11);
    Ok(())
}

#[test]
fn unkeyed_rows_continue_the_day() -> Result<()> {
    let (out, sheet_name) = append_many(
        &template(),
        &[row("2024/01/08", "WO-77"), row("20240108", "")],
        "Data",
    )?;
    assert_eq!(sheet_name, "Data");

    let sheet = XlsxEditor::open_bytes(out, "Data")?.sheet_data()?;
    assert_eq!(sheet.value(12, 1), &text("2024/01/08-04"));
    assert_eq!(sheet.value(13, 1), &text("2024/01/08-05"));
    assert_eq!(sheet.last_data_row(1), 13);
    Ok(())
}

#[test]
fn explicit_sequence_then_unkeyed() -> Result<()> {
    let (out, _) = append_many(
        &template(),
        &[row("2024/01/09-05", ""), row("2024/01/09", "")],
        "Data",
    )?;
    let sheet = XlsxEditor::open_bytes(out, "Data")?.sheet_data()?;
    assert_eq!(sheet.value(12, 1), &text("2024/01/09-05"));
    assert_eq!(sheet.value(13, 1), &text("2024/01/09-06"));
    Ok(())
}

#[test]
fn formulas_and_cached_results() -> Result<()> {
    let mut r = row("2024/01/10", "");
    r.values = six([" 10.5", "12", "9.5", "11", "10", "13 "]);
    let (out, _) = append_many(&template(), &[r], "Data")?;

    let sheet = XlsxEditor::open_bytes(out.clone(), "Data")?.sheet_data()?;
    assert_eq!(sheet.value(12, 2), &CellValue::Number(10.5));
    assert_eq!(sheet.value(12, 7), &CellValue::Number(13.0));
    assert_eq!(
        sheet.value(12, 8),
        &CellValue::Formula {
            text: "AVERAGE(B12:G12)".into(),
            cached: Some(Box::new(CellValue::Number(11.0))),
        }
    );
    assert_eq!(
        sheet.value(12, 9),
        &CellValue::Formula {
            text: "MAX(B12:G12)-MIN(B12:G12)".into(),
            cached: Some(Box::new(CellValue::Number(3.5))),
        }
    );

    let workbook = part(&out, "xl/workbook.xml");
    assert!(workbook.contains(r#"<calcPr fullCalcOnLoad="1" calcId="191029"/>"#), "{workbook}");
    Ok(())
}

#[test]
fn control_limits_are_carried_forward_verbatim() -> Result<()> {
    let (out, _) = append_many(&template(), &[row("2024/01/10", "")], "Data")?;
    let sheet = XlsxEditor::open_bytes(out, "Data")?.sheet_data()?;
    for col in 10..=15 {
        assert_eq!(sheet.value(12, col), sheet.value(11, col), "column {col}");
    }
    assert_eq!(
        sheet.value(12, 10),
        &CellValue::Formula {
            text: "AVERAGE($H$2:$H$11)".into(),
            cached: Some(Box::new(CellValue::Number(9.0))),
        }
    );
    Ok(())
}

#[test]
fn styles_and_height_follow_the_previous_record() -> Result<()> {
    let input = template();
    let (out, _) = append_many(&input, &[row("2024/01/10", "WO-9"), row("2024/01/10", "")], "Data")?;
    let sheet = XlsxEditor::open_bytes(out.clone(), "Data")?.sheet_data()?;

    for r in [12, 13] {
        for col in 1..=15 {
            assert_eq!(
                sheet.cell(r, col).and_then(|c| c.style),
                sheet.cell(11, col).and_then(|c| c.style),
                "row {r} column {col}"
            );
        }
        assert_eq!(sheet.rows[&r].height.as_deref(), Some("20.25"));
        assert!(sheet.rows[&r].custom_height);
        // owner cell: Calibri 11 with wrap, which is xf 5 in this template
        assert_eq!(sheet.cell(r, 16).and_then(|c| c.style), Some(5));
    }
    assert_eq!(sheet.value(12, 16), &text("WO-9"));
    assert_eq!(sheet.value(13, 16), &CellValue::Empty);

    // every record already resolves to an existing xf
    assert_eq!(part(&out, "xl/styles.xml"), part(&input, "xl/styles.xml"));
    Ok(())
}

#[test]
fn owner_font_missing_from_styles_is_added() -> Result<()> {
    let opts = AppendOptions {
        owner_font_name: "Arial".into(),
        owner_font_size: 9.0,
        ..AppendOptions::default()
    };
    let mut editor = XlsxEditor::open_bytes(template(), "Data")?;
    append_batch(&mut editor, &[row("2024/01/10", "WO-1")], &opts)?;
    let out = editor.into_bytes()?;

    let styles = part(&out, "xl/styles.xml");
    assert!(styles.contains(r#"<fonts count="3">"#));
    assert!(styles.contains(r#"<font><sz val="9"/><name val="Arial"/></font></fonts>"#));
    assert!(styles.contains(r#"<cellXfs count="7">"#));

    let xfs = crate::style::cell_xfs(styles.as_bytes())?;
    let sheet = XlsxEditor::open_bytes(out, "Data")?.sheet_data()?;
    let owner = &xfs[sheet.cell(12, 16).and_then(|c| c.style).unwrap() as usize];
    assert_eq!(owner.font, 2);
    assert!(owner.alignment.as_ref().is_some_and(|a| a.wrap));
    Ok(())
}

#[test]
fn formatted_empty_row_is_reused() -> Result<()> {
    let (out, _) = append_many(&template(), &[row("2024/01/10", "")], "Data")?;
    let xml = part(&out, "xl/worksheets/sheet3.xml");
    assert_eq!(xml.matches(r#"<row r="12""#).count(), 1);

    let sheet = XlsxEditor::open_bytes(out, "Data")?.sheet_data()?;
    assert_eq!(sheet.value(12, 17), &CellValue::Number(99.0));
    assert_eq!(sheet.value(12, 1), &text("2024/01/10-01"));
    assert!(xml.contains(r#"<dimension ref="A1:Q12"/>"#), "{xml}");
    Ok(())
}

#[test]
fn rows_land_in_order_and_dimension_grows() -> Result<()> {
    let rows: Vec<BatchRow> = (0..3).map(|_| row("2024/01/10", "")).collect();
    let (out, _) = append_many(&template(), &rows, "Data")?;
    let xml = part(&out, "xl/worksheets/sheet3.xml");

    let p12 = xml.find(r#"<row r="12""#).unwrap();
    let p13 = xml.find(r#"<row r="13""#).unwrap();
    let p14 = xml.find(r#"<row r="14""#).unwrap();
    assert!(p12 < p13 && p13 < p14);
    assert!(xml.contains(r#"<dimension ref="A1:Q14"/>"#), "{xml}");
    assert!(xml.contains(r#"<drawing r:id="rId1"/>"#));
    Ok(())
}

#[test]
fn charts_follow_the_new_last_row() -> Result<()> {
    let input = template();
    let rows: Vec<BatchRow> = (0..3).map(|_| row("2024/01/10", "")).collect();
    let (out, _) = append_many(&input, &rows, "Data")?;

    let chart1 = part(&out, "xl/charts/chart1.xml");
    assert_eq!(
        chart_formulas(&chart1),
        [
            ["'Data'!$H$1", "'Data'!$A$2:$A$14", "'Data'!$H$2:$H$14"],
            ["'Data'!$J$1", "'Data'!$A$2:$A$14", "'Data'!$J$2:$J$14"],
            ["'Data'!$K$1", "'Data'!$A$2:$A$14", "'Data'!$K$2:$K$14"],
            ["'Data'!$L$1", "'Data'!$A$2:$A$14", "'Data'!$L$2:$L$14"],
        ]
        .concat()
    );
    assert!(chart1.contains("<a:t>X-bar chart</a:t>"));
    assert!(chart1.contains("<a:t>kgf</a:t>"));
    assert!(chart1.contains(r#"<c:spPr><a:ln w="19050"/></c:spPr>"#));

    let chart2 = part(&out, "xl/charts/chart2.xml");
    let f2 = chart_formulas(&chart2);
    assert_eq!(f2.len(), 12);
    assert!(f2.contains(&"'Data'!$I$2:$I$14".to_owned()));
    assert!(f2.contains(&"'Data'!$O$2:$O$14".to_owned()));
    assert!(chart2.contains("<a:t>R chart</a:t>"));

    // anchors live in the drawing, which is copied through
    assert_eq!(
        part(&out, "xl/drawings/drawing1.xml"),
        part(&input, "xl/drawings/drawing1.xml")
    );
    Ok(())
}

#[test]
fn unrelated_parts_are_untouched() -> Result<()> {
    let input = template();
    let (out, _) = append_many(&input, &[row("2024/01/10", "")], "Data")?;

    for name in [
        "[Content_Types].xml",
        "docProps/app.xml",
        "xl/sharedStrings.xml",
        "xl/worksheets/sheet1.xml",
        "xl/worksheets/sheet2.xml",
        "xl/_rels/workbook.xml.rels",
    ] {
        assert_eq!(part(&out, name), part(&input, name), "{name}");
    }

    assert_eq!(part_names(&out).len(), part_names(&input).len());
    Ok(())
}

#[test]
fn header_only_sheet_starts_at_row_two() -> Result<()> {
    let (out, _) = append_many(&header_only(), &[row("2024/02/01", "first")], "Data")?;
    let sheet = XlsxEditor::open_bytes(out, "Data")?.sheet_data()?;

    assert_eq!(sheet.value(2, 1), &text("2024/02/01-01"));
    for col in 10..=15 {
        assert!(sheet.value(2, col).is_blank(), "column {col}");
        // header formatting is the only one there is to clone
        assert_eq!(sheet.cell(2, col).and_then(|c| c.style), Some(1));
    }
    assert_eq!(sheet.rows[&2].height.as_deref(), Some("30"));
    Ok(())
}

#[test]
fn empty_batch_is_its_own_error() {
    let rows = [BatchRow::default(), row("  ", "x")];
    let err = append_many(&template(), &rows, "Data").unwrap_err();
    assert_eq!(err.downcast_ref::<AppendError>(), Some(&AppendError::EmptyBatch));
}

#[test]
fn validation_failure_writes_nothing() -> Result<()> {
    let mut bad = row("2024/01/10", "");
    bad.values[4] = "five".into();
    let rows = [row("2024/01/10", ""), bad];

    let mut editor = XlsxEditor::open_bytes(template(), "Data")?;
    let err = append_batch(&mut editor, &rows, &AppendOptions::default()).unwrap_err();
    let err = err.downcast_ref::<AppendError>().unwrap();
    assert_eq!(err.row(), Some(2));
    assert!(err.to_string().contains("Value_5"), "{err}");
    assert_eq!(editor.last_data_row()?, 11);
    Ok(())
}

#[test]
fn bad_date_is_reported_verbatim() {
    let err = append_many(&template(), &[row("2024-13-45", "")], "Data").unwrap_err();
    assert_eq!(
        err.downcast_ref::<AppendError>(),
        Some(&AppendError::Format("2024-13-45".into()))
    );
}

#[test]
fn last_key_is_shown_in_composed_form() -> Result<()> {
    let input = template();
    assert_eq!(last_recorded_key(&input, "Data")?, "2024/01/08-03");
    assert_eq!(last_recorded_key(&header_only(), "Data")?, "");

    let (out, _) = append_many(&input, &[row("2024/01/09", "")], "Data")?;
    assert_eq!(last_recorded_key(&out, "Data")?, "2024/01/09-01");

    // a bare date typed straight into the sheet shows as -00
    let mut rows = header_row();
    rows.push_str(&data_row(2, HEADERS.len()));
    let bare = package(&data_sheet(&rows, "A1:P2"), &shared_strings(&["2024/03/04".into()]));
    assert_eq!(last_recorded_key(&bare, "Data")?, "2024/03/04-00");
    Ok(())
}

#[test]
fn cloned_styles_keep_the_source_index() -> Result<()> {
    // xf 6 matches xf 3 field by field but also carries quotePrefix
    let styles = STYLES.replace(r#"<cellXfs count="6">"#, r#"<cellXfs count="7">"#).replace(
        "</cellXfs>",
        r#"<xf numFmtId="2" fontId="0" fillId="0" borderId="1" xfId="0" applyNumberFormat="1" applyBorder="1" quotePrefix="1"/></cellXfs>"#,
    );
    let rows = records().replace(r#" s="3">"#, r#" s="6">"#);
    let input = package_with(
        &data_sheet(&rows, "A1:P11"),
        &shared_strings(&fixture_keys()),
        &styles,
        Charts::Both,
    );
    let (out, _) = append_many(&input, &[row("2024/01/10", "")], "Data")?;

    let sheet = XlsxEditor::open_bytes(out.clone(), "Data")?.sheet_data()?;
    for col in 2..=7 {
        assert_eq!(sheet.cell(11, col).and_then(|c| c.style), Some(6), "column {col}");
        assert_eq!(sheet.cell(12, col).and_then(|c| c.style), Some(6), "column {col}");
    }
    assert_eq!(part(&out, "xl/styles.xml"), styles);
    Ok(())
}

#[test]
fn single_chart_is_bound_to_the_mean_family() -> Result<()> {
    let input = package_with(
        &data_sheet(&records(), "A1:P11"),
        &shared_strings(&fixture_keys()),
        STYLES,
        Charts::MeanOnly,
    );
    let mut editor = XlsxEditor::open_bytes(input.clone(), "Data")?;
    let outcome = append_batch(&mut editor, &[row("2024/01/10", "")], &AppendOptions::default())?;
    assert_eq!(outcome.charts_rebound, 1);
    let out = editor.into_bytes()?;

    assert_eq!(
        chart_formulas(&part(&out, "xl/charts/chart1.xml")),
        [
            ["'Data'!$H$1", "'Data'!$A$2:$A$12", "'Data'!$H$2:$H$12"],
            ["'Data'!$J$1", "'Data'!$A$2:$A$12", "'Data'!$J$2:$J$12"],
            ["'Data'!$K$1", "'Data'!$A$2:$A$12", "'Data'!$K$2:$K$12"],
            ["'Data'!$L$1", "'Data'!$A$2:$A$12", "'Data'!$L$2:$L$12"],
        ]
        .concat()
    );
    assert_eq!(part_names(&out), part_names(&input));
    Ok(())
}

#[test]
fn sheet_without_charts_only_gains_the_row() -> Result<()> {
    let input = package_with(
        &data_sheet(&records(), "A1:P11"),
        &shared_strings(&fixture_keys()),
        STYLES,
        Charts::None,
    );
    let mut editor = XlsxEditor::open_bytes(input.clone(), "Data")?;
    let outcome = append_batch(&mut editor, &[row("2024/01/10", "")], &AppendOptions::default())?;
    assert_eq!(outcome.charts_rebound, 0);
    assert_eq!(outcome.last_row(), Some(12));
    let out = editor.into_bytes()?;

    assert_eq!(part_names(&out), part_names(&input));
    for name in part_names(&input) {
        if name == "xl/worksheets/sheet3.xml" || name == "xl/workbook.xml" {
            continue;
        }
        assert_eq!(part(&out, &name), part(&input, &name), "{name}");
    }
    Ok(())
}

#[test]
fn last_key_text_is_trimmed() -> Result<()> {
    let mut rows = header_row();
    rows.push_str(&data_row(2, HEADERS.len()));
    let input = package(&data_sheet(&rows, "A1:P2"), &shared_strings(&["  lot 7 ".into()]));
    assert_eq!(last_recorded_key(&input, "Data")?, "lot 7");
    Ok(())
}

#[test]
fn prefixed_spreadsheetml_stays_prefixed() -> Result<()> {
    let workbook = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<x:workbook xmlns:x="{MAIN_NS}" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><x:sheets><x:sheet name="Data" sheetId="1" r:id="rId1"/></x:sheets></x:workbook>"#
    );
    let sheet = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<x:worksheet xmlns:x="{MAIN_NS}"><x:dimension ref="A1:P2"/><x:sheetData><x:row r="1"><x:c r="A1" t="inlineStr"><x:is><x:t>Date</x:t></x:is></x:c></x:row><x:row r="2"><x:c r="A2" t="inlineStr"><x:is><x:t>2024/05/02-01</x:t></x:is></x:c><x:c r="B2" s="3"><x:v>10</x:v></x:c></x:row></x:sheetData></x:worksheet>"#
    );
    let shared = shared_strings(&[]);
    let input = zip_bytes(&[
        ("[Content_Types].xml", CONTENT_TYPES.as_bytes()),
        ("_rels/.rels", ROOT_RELS.as_bytes()),
        ("xl/workbook.xml", workbook.as_bytes()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes()),
        ("xl/styles.xml", STYLES.as_bytes()),
        ("xl/sharedStrings.xml", shared.as_bytes()),
        ("xl/worksheets/sheet1.xml", sheet.as_bytes()),
    ]);

    let (out, _) = append_many(&input, &[row("2024/05/02", "WO-1")], "Data")?;
    let xml = part(&out, "xl/worksheets/sheet1.xml");
    let doc = Document::parse(&xml)?;
    for node in doc.descendants().filter(|n| n.is_element()) {
        assert_eq!(node.tag_name().namespace(), Some(MAIN_NS), "<{}>", node.tag_name().name());
    }
    assert!(xml.contains(r#"<x:row r="3""#), "{xml}");
    assert!(xml.contains(r#"<x:dimension ref="A1:P3"/>"#), "{xml}");
    assert_eq!(last_recorded_key(&out, "Data")?, "2024/05/02-02");

    let workbook = part(&out, "xl/workbook.xml");
    assert!(workbook.ends_with(r#"<x:calcPr fullCalcOnLoad="1"/></x:workbook>"#), "{workbook}");
    Document::parse(&workbook)?;
    Ok(())
}
