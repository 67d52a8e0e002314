//! chart_part.rs – rebinds the control-chart series to the grown data range.
//!
//! Only `<ser>` elements of the first plot group are rewritten; chart titles,
//! axes and the drawing anchors are never touched.

use anyhow::{Context, Result};
use quick_xml::escape::partial_escape;
use roxmltree::{Document, Node};
use std::ops::Range;
use tracing::{debug, warn};

use crate::{
    XlsxEditor,
    files_part::{part_relationships, resolve_target},
    layout::{COL_KEY, MEAN_FAMILY, RANGE_FAMILY},
    read_part::column_name,
};

const REL_CHART: &str = "/chart";

/// Elements that precede `<ser>` inside a plot group.
const BEFORE_SERIES: [&str; 7] = [
    "barDir",
    "grouping",
    "varyColors",
    "scatterStyle",
    "radarStyle",
    "wireframe",
    "ofPieType",
];

/// Elements that follow the data references inside `<ser>`.
const AFTER_DATA: [&str; 4] = ["smooth", "shape", "bubble3D", "extLst"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartFamily {
    /// X̄ chart: mean plus its center/upper/lower limits.
    Mean,
    /// R chart: range plus its limits.
    Range,
}

impl ChartFamily {
    pub fn columns(self) -> [u32; 4] {
        match self {
            ChartFamily::Mean => MEAN_FAMILY,
            ChartFamily::Range => RANGE_FAMILY,
        }
    }
}

impl XlsxEditor {
    /// Chart parts anchored on this sheet, in drawing order.
    pub fn sheet_charts(&mut self) -> Result<Vec<String>> {
        let sheet_text = std::str::from_utf8(&self.sheet_xml).context("worksheet is not UTF-8")?;
        let doc = Document::parse(sheet_text).context("worksheet XML is malformed")?;
        let Some(drawing_rid) = doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "drawing")
            .and_then(rel_id)
        else {
            return Ok(Vec::new());
        };

        let sheet_rels = part_relationships(&mut self.package, &self.sheet_path)?;
        let Some(rel) = sheet_rels.iter().find(|r| r.id == drawing_rid) else {
            return Ok(Vec::new());
        };
        let drawing_path = resolve_target(&self.sheet_path, &rel.target);
        let Some(drawing_xml) = self.package.read_part(&drawing_path)? else {
            return Ok(Vec::new());
        };
        let drawing_rels = part_relationships(&mut self.package, &drawing_path)?;

        let text = std::str::from_utf8(&drawing_xml)
            .with_context(|| format!("{drawing_path} is not UTF-8"))?;
        let doc = Document::parse(text).with_context(|| format!("{drawing_path} is malformed"))?;

        let mut charts: Vec<String> = Vec::new();
        for rid in doc
            .descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == "chart")
            .filter_map(rel_id)
        {
            let Some(rel) = drawing_rels
                .iter()
                .find(|r| r.id == rid && r.type_.ends_with(REL_CHART))
            else {
                continue;
            };
            let path = resolve_target(&drawing_path, &rel.target);
            if !charts.contains(&path) {
                charts.push(path);
            }
        }
        Ok(charts)
    }

    /// Points the first chart at the mean family and the second at the range
    /// family, over rows `2..=last_row`. Returns how many charts were rebound.
    pub fn extend_charts(&mut self, last_row: u32) -> Result<usize> {
        let charts = self.sheet_charts()?;
        let mut rebound = 0;
        for (path, family) in charts.iter().zip([ChartFamily::Mean, ChartFamily::Range]) {
            let xml = self.package.part(path)?;
            match rebind_chart(&xml, &self.sheet_name, family.columns(), last_row)
                .with_context(|| format!("rebinding {path}"))?
            {
                Some(new_xml) => {
                    self.package.set_part(path, new_xml);
                    rebound += 1;
                    debug!(chart = %path, ?family, last_row, "chart series rebound");
                }
                None => warn!(chart = %path, "chart has no plot element; left untouched"),
            }
        }
        Ok(rebound)
    }
}

/// Rewrites the first plot group so it has exactly one series per column.
///
/// `None` when the chart has no plot group to rebind.
pub fn rebind_chart(
    xml: &[u8],
    sheet_name: &str,
    columns: [u32; 4],
    last_row: u32,
) -> Result<Option<Vec<u8>>> {
    let text = std::str::from_utf8(xml).context("chart is not UTF-8")?;
    let doc = Document::parse(text).context("chart XML is malformed")?;

    let Some(plot) = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "plotArea")
        .and_then(|pa| {
            pa.children()
                .find(|n| n.is_element() && n.tag_name().name().ends_with("Chart"))
        })
    else {
        return Ok(None);
    };

    let prefix = qualified_name(text, plot)
        .rsplit_once(':')
        .map_or("", |(p, _)| p);
    let refs = SeriesRefs {
        prefix,
        scatter: plot.tag_name().name() == "scatterChart",
        sheet: quote_sheet(sheet_name),
        last_row,
    };

    let series: Vec<Node> = children(plot, "ser").collect();
    let mut next_idx = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "ser")
        .filter_map(|s| child_val(s, "idx"))
        .max()
        .map_or(0, |m| m + 1);

    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    for (i, ser) in series.iter().enumerate() {
        match columns.get(i) {
            Some(&col) => edits.push((ser.range(), refs.rebuild(text, *ser, col))),
            None => edits.push((ser.range(), String::new())),
        }
    }

    if series.len() < columns.len() {
        let at = match series.last() {
            Some(last) => last.range().end,
            None => plot
                .children()
                .filter(|n| n.is_element() && BEFORE_SERIES.contains(&n.tag_name().name()))
                .last()
                .map_or_else(|| start_tag_end(text, plot), |n| n.range().end),
        };
        let mut fresh = String::new();
        for &col in &columns[series.len()..] {
            fresh.push_str(&refs.fresh(next_idx, col));
            next_idx += 1;
        }
        edits.push((at..at, fresh));
    }

    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut out = text.to_owned();
    for (range, replacement) in edits {
        out.replace_range(range, &replacement);
    }
    Ok(Some(out.into_bytes()))
}

struct SeriesRefs<'a> {
    prefix: &'a str,
    scatter: bool,
    sheet: String,
    last_row: u32,
}

impl SeriesRefs<'_> {
    fn el(&self, local: &str) -> String {
        if self.prefix.is_empty() {
            local.to_owned()
        } else {
            format!("{}:{local}", self.prefix)
        }
    }

    fn wrap(&self, local: &str, inner: &str) -> String {
        let name = self.el(local);
        format!("<{name}>{inner}</{name}>")
    }

    fn formula_ref(&self, kind: &str, formula: &str) -> String {
        self.wrap(kind, &self.wrap("f", &partial_escape(formula)))
    }

    fn tx(&self, col: u32) -> String {
        let f = format!("{}!${}$1", self.sheet, column_name(col));
        self.wrap("tx", &self.formula_ref("strRef", &f))
    }

    fn categories(&self) -> String {
        let letter = column_name(COL_KEY);
        let f = format!("{}!${letter}$2:${letter}${}", self.sheet, self.last_row);
        self.wrap(if self.scatter { "xVal" } else { "cat" }, &self.formula_ref("strRef", &f))
    }

    fn values(&self, col: u32) -> String {
        let letter = column_name(col);
        let f = format!("{}!${letter}$2:${letter}${}", self.sheet, self.last_row);
        self.wrap(if self.scatter { "yVal" } else { "val" }, &self.formula_ref("numRef", &f))
    }

    fn fresh(&self, idx: u32, col: u32) -> String {
        let idx_el = self.el("idx");
        let order_el = self.el("order");
        self.wrap(
            "ser",
            &format!(
                r#"<{idx_el} val="{idx}"/><{order_el} val="{idx}"/>{}{}{}"#,
                self.tx(col),
                self.categories(),
                self.values(col)
            ),
        )
    }

    /// Keeps every child of `ser` except the three data references.
    fn rebuild(&self, text: &str, ser: Node<'_, '_>, col: u32) -> String {
        let kids: Vec<Node> = ser.children().filter(Node::is_element).collect();
        if kids.is_empty() {
            return self.fresh(child_val(ser, "idx").unwrap_or(0), col);
        }

        let (cat_name, val_name) = if self.scatter { ("xVal", "yVal") } else { ("cat", "val") };
        let has = |name: &str| kids.iter().any(|k| k.tag_name().name() == name);
        let need_tx = !has("tx");
        let mut pending_data = true;

        let mut out = text[ser.range().start..start_tag_end(text, ser)].to_owned();
        for kid in &kids {
            let name = kid.tag_name().name();
            if pending_data && AFTER_DATA.contains(&name) {
                out.push_str(&self.categories());
                out.push_str(&self.values(col));
                pending_data = false;
            }
            match name {
                "tx" => out.push_str(&self.tx(col)),
                n if n == cat_name || n == val_name => {
                    if pending_data {
                        out.push_str(&self.categories());
                        out.push_str(&self.values(col));
                        pending_data = false;
                    }
                }
                _ => out.push_str(&text[kid.range()]),
            }
            if need_tx && name == "order" {
                out.push_str(&self.tx(col));
            }
        }
        if pending_data {
            out.push_str(&self.categories());
            out.push_str(&self.values(col));
        }
        out.push_str(&format!("</{}>", qualified_name(text, ser)));
        out
    }
}

fn children<'a, 'input>(
    parent: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    parent
        .children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn child_val(node: Node<'_, '_>, name: &'static str) -> Option<u32> {
    children(node, name).next()?.attribute("val")?.parse().ok()
}

/// `r:id`, whatever prefix the relationships namespace is bound to.
fn rel_id(node: Node<'_, '_>) -> Option<String> {
    node.attributes()
        .find(|a| a.name() == "id" && a.namespace().is_some())
        .map(|a| a.value().to_owned())
}

/// Element name as written in the source, prefix included.
fn qualified_name<'t>(text: &'t str, node: Node<'_, '_>) -> &'t str {
    let open = &text[node.range().start + 1..];
    let end = open
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(open.len());
    &open[..end]
}

/// Byte offset just past the start tag's `>`.
fn start_tag_end(text: &str, node: Node<'_, '_>) -> usize {
    let start = node.range().start;
    let mut quote = None;
    for (i, b) in text.as_bytes()[start..].iter().enumerate() {
        match (quote, *b) {
            (None, b'"' | b'\'') => quote = Some(*b),
            (Some(q), c) if c == q => quote = None,
            (None, b'>') => return start + i + 1,
            _ => {}
        }
    }
    node.range().end
}

fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}
