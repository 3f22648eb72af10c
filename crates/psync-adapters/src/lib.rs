//! Site rule sets + rule-driven extraction of listing and detail pages.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use psync_core::{DiagnosticKind, Diagnostics, ProfileRecord, RecordSchema, SheetInput};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

mod sites;

pub use sites::{
    all_sites, site_rules, ANGEL_LIVE, CHATPIA, DMM, JEWEL_LIVE, LIVE, MADAM, MADAM_LIVE,
};

pub const CRATE_NAME: &str = "psync-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// Where a field value is read from once its element is located.
#[derive(Debug, Clone, Copy)]
pub enum ValueSource {
    Text,
    Attr(&'static str),
    /// First attribute present with a non-empty value.
    FirstAttr(&'static [&'static str]),
    /// `url(...)` inside the element's inline `style`.
    BackgroundImage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Resolve against the page URL (also fixes scheme-relative `//host/...`).
    ResolveUrl,
    StripLeadingColon,
    Digits,
    CupSize,
    /// Drop parenthesised notes and symbol characters from display names.
    SanitizeName,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub column: &'static str,
    /// `None` reads the scope element itself (the card, or the document root).
    pub selector: Option<&'static str>,
    pub source: ValueSource,
    pub transforms: &'static [Transform],
}

impl FieldRule {
    pub const fn text(column: &'static str, selector: &'static str) -> Self {
        Self {
            column,
            selector: Some(selector),
            source: ValueSource::Text,
            transforms: &[],
        }
    }

    pub const fn link(column: &'static str, selector: &'static str) -> Self {
        Self {
            column,
            selector: Some(selector),
            source: ValueSource::Attr("href"),
            transforms: &[Transform::ResolveUrl],
        }
    }

    pub const fn background(column: &'static str, selector: &'static str) -> Self {
        Self {
            column,
            selector: Some(selector),
            source: ValueSource::BackgroundImage,
            transforms: &[Transform::ResolveUrl],
        }
    }

    pub const fn with(self, transforms: &'static [Transform]) -> Self {
        Self { transforms, ..self }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListingRules {
    /// Tried in order; the first selector matching at least one card wins.
    pub card_selectors: &'static [&'static str],
    /// When a column appears in several rules, the first non-empty value wins.
    pub fields: &'static [FieldRule],
    /// Cards with an empty value in any of these columns are skipped.
    pub required: &'static [&'static str],
}

/// Detail-page label → column mapping.
#[derive(Debug, Clone, Copy)]
pub struct LabelRule {
    pub column: &'static str,
    pub keywords: &'static [&'static str],
    /// Match the whole label instead of a substring.
    pub exact: bool,
    pub transforms: &'static [Transform],
}

impl LabelRule {
    pub const fn contains(column: &'static str, keywords: &'static [&'static str]) -> Self {
        Self {
            column,
            keywords,
            exact: false,
            transforms: &[],
        }
    }

    pub const fn exact(column: &'static str, label: &'static [&'static str]) -> Self {
        Self {
            column,
            keywords: label,
            exact: true,
            transforms: &[],
        }
    }

    pub const fn with(self, transforms: &'static [Transform]) -> Self {
        Self { transforms, ..self }
    }

    fn matches(&self, label: &str) -> bool {
        if self.exact {
            self.keywords.iter().any(|k| label == *k)
        } else {
            self.keywords.iter().any(|k| label.contains(k))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PairLayout {
    /// Every `row` element holds one `label` and one `value` descendant.
    Rows {
        row: &'static str,
        label: &'static str,
        value: &'static str,
    },
    /// Each `label` element is followed by a sibling matching `value`.
    LabelNext {
        label: &'static str,
        value: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PairRule {
    pub scope: Option<&'static str>,
    pub layout: PairLayout,
}

#[derive(Debug, Clone, Copy)]
pub struct TagListRule {
    pub column: &'static str,
    pub scope: Option<&'static str>,
    pub selector: &'static str,
    pub separator: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct DetailRules {
    /// Columns owned by the detail page; defaulted to `""` when not found.
    pub columns: &'static [&'static str],
    pub pairs: &'static [PairRule],
    pub labels: &'static [LabelRule],
    pub tag_lists: &'static [TagListRule],
    /// Direct selectors, consulted for columns still empty after pairs and tags.
    pub selectors: &'static [FieldRule],
    /// Columns resolved last by searching any short element containing one of
    /// the column's label keywords and reading its next sibling.
    pub labelled_fallback: &'static [&'static str],
}

/// Static description of one site variant.
#[derive(Debug, Clone, Copy)]
pub struct SiteRules {
    pub site_id: &'static str,
    pub display_name: &'static str,
    pub default_listing_url: Option<&'static str>,
    pub default_sheet_name: &'static str,
    /// Cell interpretation used when appending to the sheet.
    pub sheet_input: SheetInput,
    /// Sink column order.
    pub columns: &'static [&'static str],
    pub identifier_column: &'static str,
    pub listing: ListingRules,
    pub detail: Option<DetailRules>,
    /// Fallback values for columns left empty after extraction.
    pub defaults: &'static [(&'static str, &'static str)],
    /// Written into every still-empty column, for sinks that reject blanks.
    pub placeholder: Option<&'static str>,
    pub warm_up_url: Option<&'static str>,
    pub extra_headers: &'static [(&'static str, &'static str)],
    /// Relational mirror table; `None` disables the mirror for this variant.
    pub mirror_table: Option<&'static str>,
    pub render_wait_selector: Option<&'static str>,
}

impl SiteRules {
    pub fn schema(&self) -> RecordSchema {
        RecordSchema::new(self.columns, self.identifier_column)
    }
}

#[derive(Debug, Default)]
pub struct ListingExtraction {
    pub cards_seen: usize,
    pub candidates: Vec<ProfileRecord>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug)]
pub struct DetailExtraction {
    pub record: ProfileRecord,
    pub matched: usize,
    pub missing: Vec<&'static str>,
}

static BACKGROUND_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"url\((.*?)\)").expect("static regex"));
static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static regex"));
static CUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-ZＡ-Ｚ])カップ").expect("static regex"));
static PARENTHESISED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[(（].*?[)）]").expect("static regex"));
static NAME_SYMBOLS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s々ー\-]+").expect("static regex"));

fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// Text of `el` with every whitespace run collapsed to a single space.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn background_url(style: &str) -> Option<String> {
    BACKGROUND_URL
        .captures(style)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().trim_matches(|c: char| c == '\'' || c == '"').to_string())
        .filter(|s| !s.is_empty())
}

fn read_source(el: ElementRef<'_>, source: ValueSource) -> String {
    match source {
        ValueSource::Text => element_text(el),
        ValueSource::Attr(name) => el.value().attr(name).unwrap_or_default().trim().to_string(),
        ValueSource::FirstAttr(names) => names
            .iter()
            .filter_map(|n| el.value().attr(n))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .unwrap_or_default()
            .to_string(),
        ValueSource::BackgroundImage => el
            .value()
            .attr("style")
            .and_then(background_url)
            .unwrap_or_default(),
    }
}

fn apply_transforms(mut value: String, transforms: &[Transform], base: Option<&Url>) -> String {
    for transform in transforms {
        if value.is_empty() {
            break;
        }
        value = match transform {
            Transform::ResolveUrl => match base {
                Some(base) => base
                    .join(&value)
                    .map(|u| u.to_string())
                    .unwrap_or(value),
                None => value,
            },
            Transform::StripLeadingColon => value
                .trim_start_matches(|c: char| c == '：' || c == ':')
                .trim()
                .to_string(),
            Transform::Digits => DIGITS
                .find(&value)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
            Transform::CupSize => match CUP.captures(&value).and_then(|c| c.get(1)) {
                Some(letter) => format!("{}カップ", letter.as_str()),
                None => value,
            },
            Transform::SanitizeName => {
                let without_notes = PARENTHESISED.replace_all(&value, "");
                NAME_SYMBOLS.replace_all(&without_notes, "").trim().to_string()
            }
        };
    }
    value
}

fn apply_field_rule(
    scope: ElementRef<'_>,
    rule: &FieldRule,
    base: Option<&Url>,
) -> Result<String, AdapterError> {
    let raw = match rule.selector {
        None => read_source(scope, rule.source),
        Some(selector) => {
            let sel = parse_selector(selector)?;
            scope
                .select(&sel)
                .map(|el| read_source(el, rule.source))
                .find(|v| !v.is_empty())
                .unwrap_or_default()
        }
    };
    Ok(apply_transforms(raw, rule.transforms, base))
}

fn fill_fields(
    scope: ElementRef<'_>,
    rules: &[FieldRule],
    base: Option<&Url>,
    fields: &mut BTreeMap<String, String>,
) -> Result<(), AdapterError> {
    for rule in rules {
        if fields.get(rule.column).is_some_and(|v| !v.is_empty()) {
            continue;
        }
        let value = apply_field_rule(scope, rule, base)?;
        if !value.is_empty() {
            fields.insert(rule.column.to_string(), value);
        }
    }
    Ok(())
}

fn collect_pairs(
    root: ElementRef<'_>,
    rule: &PairRule,
) -> Result<Vec<(String, String)>, AdapterError> {
    let scopes: Vec<ElementRef<'_>> = match rule.scope {
        Some(scope) => root.select(&parse_selector(scope)?).collect(),
        None => vec![root],
    };
    let mut pairs = Vec::new();
    for scope in scopes {
        match rule.layout {
            PairLayout::Rows { row, label, value } => {
                let (row, label, value) = (
                    parse_selector(row)?,
                    parse_selector(label)?,
                    parse_selector(value)?,
                );
                for row_el in scope.select(&row) {
                    let label_text = row_el
                        .select(&label)
                        .next()
                        .map(element_text)
                        .unwrap_or_default();
                    if label_text.is_empty() {
                        continue;
                    }
                    let value_text = row_el
                        .select(&value)
                        .next()
                        .map(element_text)
                        .unwrap_or_default();
                    pairs.push((label_text, value_text));
                }
            }
            PairLayout::LabelNext { label, value } => {
                let (label, value) = (parse_selector(label)?, parse_selector(value)?);
                for label_el in scope.select(&label) {
                    let label_text = element_text(label_el);
                    if label_text.is_empty() {
                        continue;
                    }
                    let value_text = label_el
                        .next_siblings()
                        .filter_map(ElementRef::wrap)
                        .find(|sib| value.matches(sib))
                        .map(element_text)
                        .unwrap_or_default();
                    pairs.push((label_text, value_text));
                }
            }
        }
    }
    Ok(pairs)
}

const LABEL_CANDIDATES: &str = "dt, th, span, div, p, li, label";
const MAX_LABEL_CHARS: usize = 24;

fn labelled_sibling_value(
    root: ElementRef<'_>,
    keywords: &[&str],
) -> Result<Option<String>, AdapterError> {
    let candidates = parse_selector(LABEL_CANDIDATES)?;
    for el in root.select(&candidates) {
        let own = element_text(el);
        if own.is_empty() || own.chars().count() > MAX_LABEL_CHARS {
            continue;
        }
        if !keywords.iter().any(|k| own.contains(k)) {
            continue;
        }
        let next = el
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .map(element_text)
            .find(|v| !v.is_empty());
        if next.is_some() {
            return Ok(next);
        }
    }
    Ok(None)
}

/// Applies one [`SiteRules`] to raw documents.
#[derive(Debug, Clone)]
pub struct SiteExtractor {
    rules: &'static SiteRules,
    schema: RecordSchema,
}

impl SiteExtractor {
    pub fn new(rules: &'static SiteRules) -> Self {
        Self {
            rules,
            schema: rules.schema(),
        }
    }

    pub fn rules(&self) -> &'static SiteRules {
        self.rules
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn has_detail(&self) -> bool {
        self.rules.detail.is_some()
    }

    /// Detail-page URL of a listing candidate.
    pub fn detail_url<'a>(&self, record: &'a ProfileRecord) -> &'a str {
        record.field("url").unwrap_or(record.identifier())
    }

    /// Candidates in document order. Cards without an identifier or missing a
    /// required column are skipped and reported, never fatal.
    pub fn extract_listing(
        &self,
        document: &str,
        base_url: &str,
    ) -> Result<ListingExtraction, AdapterError> {
        let base = Url::parse(base_url)?;
        let html = Html::parse_document(document);
        let root = html.root_element();

        let mut cards = Vec::new();
        for selector in self.rules.listing.card_selectors {
            let sel = parse_selector(selector)?;
            cards = root.select(&sel).collect::<Vec<_>>();
            if !cards.is_empty() {
                break;
            }
        }

        let mut out = ListingExtraction {
            cards_seen: cards.len(),
            ..Default::default()
        };

        for (index, card) in cards.into_iter().enumerate() {
            let mut fields = BTreeMap::new();
            fill_fields(card, self.rules.listing.fields, Some(&base), &mut fields)?;

            let identifier = fields
                .get(self.rules.identifier_column)
                .cloned()
                .unwrap_or_default();
            if !(identifier.starts_with("http://") || identifier.starts_with("https://")) {
                out.diagnostics.push(
                    DiagnosticKind::SkippedCard,
                    format!("card #{index}"),
                    format!("no usable {} ({identifier:?})", self.rules.identifier_column),
                );
                continue;
            }
            if let Some(missing) = self
                .rules
                .listing
                .required
                .iter()
                .find(|c| fields.get(**c).map_or(true, |v| v.is_empty()))
            {
                out.diagnostics.push(
                    DiagnosticKind::SkippedCard,
                    identifier,
                    format!("required column {missing} is empty"),
                );
                continue;
            }

            match ProfileRecord::new(identifier.clone(), fields) {
                Ok(record) => out.candidates.push(record),
                Err(err) => out
                    .diagnostics
                    .push(DiagnosticKind::SkippedCard, identifier, err.to_string()),
            }
        }

        Ok(out)
    }

    /// Enriches `record` from its detail page. Fields that cannot be found are
    /// left as empty strings; the caller decides whether that is worth a diagnostic.
    pub fn extract_detail(
        &self,
        document: &str,
        record: ProfileRecord,
    ) -> Result<DetailExtraction, AdapterError> {
        let Some(detail) = self.rules.detail.as_ref() else {
            return Ok(DetailExtraction {
                record: self.finalize(record),
                matched: 0,
                missing: Vec::new(),
            });
        };

        let base = Url::parse(self.detail_url(&record)).ok();
        let found = {
            let html = Html::parse_document(document);
            let root = html.root_element();
            let mut found: BTreeMap<String, String> = BTreeMap::new();

            for pair_rule in detail.pairs {
                for (label, value) in collect_pairs(root, pair_rule)? {
                    let Some(rule) = detail.labels.iter().find(|r| r.matches(&label)) else {
                        continue;
                    };
                    let value = apply_transforms(value, rule.transforms, base.as_ref());
                    if !value.is_empty() {
                        found.insert(rule.column.to_string(), value);
                    }
                }
            }

            for tags in detail.tag_lists {
                let scopes: Vec<ElementRef<'_>> = match tags.scope {
                    Some(scope) => root.select(&parse_selector(scope)?).collect(),
                    None => vec![root],
                };
                let sel = parse_selector(tags.selector)?;
                let values = scopes
                    .into_iter()
                    .flat_map(|scope| scope.select(&sel).map(element_text).collect::<Vec<_>>())
                    .filter(|v| !v.is_empty())
                    .collect::<Vec<_>>();
                if !values.is_empty() {
                    found.insert(tags.column.to_string(), values.join(tags.separator));
                }
            }

            fill_fields(root, detail.selectors, base.as_ref(), &mut found)?;

            for column in detail.labelled_fallback {
                if found.get(*column).is_some_and(|v| !v.is_empty()) {
                    continue;
                }
                let keywords = detail
                    .labels
                    .iter()
                    .filter(|r| r.column == *column)
                    .flat_map(|r| r.keywords.iter().copied())
                    .collect::<Vec<_>>();
                if let Some(value) = labelled_sibling_value(root, &keywords)? {
                    found.insert(column.to_string(), value);
                }
            }
            found
        };

        let mut matched = 0usize;
        let mut missing = Vec::new();
        let mut merged = Vec::new();
        for column in detail.columns {
            match found.get(*column).filter(|v| !v.is_empty()) {
                Some(value) => {
                    matched += 1;
                    merged.push((column.to_string(), value.clone()));
                }
                None => {
                    missing.push(*column);
                    if record.field(column).is_none() {
                        merged.push((column.to_string(), String::new()));
                    }
                }
            }
        }

        Ok(DetailExtraction {
            record: self.finalize(record.with_fields(merged)),
            matched,
            missing,
        })
    }

    /// Applies variant defaults and the empty-column placeholder.
    pub fn finalize(&self, record: ProfileRecord) -> ProfileRecord {
        let mut extra = Vec::new();
        for column in self.schema.columns() {
            let current = record.field(column).unwrap_or_default();
            if !current.is_empty() {
                continue;
            }
            let default = self
                .rules
                .defaults
                .iter()
                .find(|(c, _)| *c == column.as_str())
                .map(|(_, v)| *v)
                .or(self.rules.placeholder);
            if let Some(value) = default {
                extra.push((column.clone(), value.to_string()));
            }
        }
        record.with_fields(extra)
    }
}
