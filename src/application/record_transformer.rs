use chrono::{NaiveDate, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::application::{
    report::ItemTally,
    shapes::{self, ItemShape},
};
use crate::domain::{
    error::TransformError,
    field_map::{FieldMap, PriceSelection},
    models::{ItemSkip, NormalizedDocument, PriceObservation, ProductRecord, StorePrices},
};

#[derive(Debug)]
pub struct Transformed {
    pub shape: ItemShape,
    pub records: Vec<ProductRecord>,
    /// `emitted` plus the per-item skip counts.
    pub tally: ItemTally,
}

/// Maps normalized retailer documents onto `ProductRecord`s for one store.
#[derive(Debug, Clone)]
pub struct RecordTransformer {
    fields: FieldMap,
    store_id: String,
    observed_on: NaiveDate,
}

impl RecordTransformer {
    pub fn new(fields: FieldMap, store_id: impl Into<String>) -> Self {
        Self {
            fields,
            store_id: store_id.into(),
            observed_on: Utc::now().date_naive(),
        }
    }

    pub fn observed_on(mut self, date: NaiveDate) -> Self {
        self.observed_on = date;
        self
    }

    /// Records in source order. Duplicate barcodes are kept; the store
    /// deduplicates them.
    pub fn transform(&self, doc: &NormalizedDocument) -> Result<Transformed, TransformError> {
        let top = shapes::top_level(doc, &self.fields);
        let Some((shape, items)) = shapes::detect(top, &self.fields) else {
            let shape = describe(top);
            warn!("No identifiable items, top-level shape: {:?}", shape);
            return Err(TransformError::NoIdentifiableItems { shape });
        };
        debug!("Using {} ({} raw items)", shape, items.len());

        let mut tally = ItemTally::default();
        let mut records = Vec::with_capacity(items.len());
        for raw in &items {
            match self.build(raw) {
                Ok(record) => records.push(record),
                Err(skip) => {
                    debug!("Skipping item {:?}: {:?}", self.text(raw, Some(&self.fields.name)), skip);
                    tally.record_skip(skip);
                }
            }
        }
        tally.emitted = records.len() as u64;

        info!(
            "Transformed {} records for store {} ({} skipped)",
            records.len(),
            self.store_id,
            tally.skipped()
        );
        Ok(Transformed { shape, records, tally })
    }

    fn build(&self, raw: &Map<String, Value>) -> Result<ProductRecord, ItemSkip> {
        let barcode = self
            .text(raw, Some(&self.fields.barcode))
            .ok_or(ItemSkip::MissingBarcode)?;
        let price = self.price(raw)?;

        Ok(ProductRecord {
            barcode,
            name: self.text(raw, Some(&self.fields.name)),
            category: self.text(raw, self.fields.category.as_ref()),
            image: self.text(raw, self.fields.image.as_ref()),
            store_prices: vec![StorePrices {
                store_id: self.store_id.clone(),
                prices: vec![PriceObservation {
                    date: self.observed_on,
                    price,
                    promotion: self.text(raw, self.fields.promotion.as_ref()),
                }],
            }],
        })
    }

    fn price(&self, raw: &Map<String, Value>) -> Result<f64, ItemSkip> {
        let regular = || parse_price(self.text(raw, Some(&self.fields.price)));
        match self.fields.price_selection {
            PriceSelection::Regular => regular(),
            PriceSelection::Promotional => {
                parse_price(self.text(raw, self.fields.promo_price.as_ref())).or_else(|_| regular())
            }
        }
    }

    fn text(&self, raw: &Map<String, Value>, key: Option<&String>) -> Option<String> {
        key.and_then(|k| raw.get(k)).and_then(scalar_text)
    }
}

fn parse_price(text: Option<String>) -> Result<f64, ItemSkip> {
    let text = text.ok_or(ItemSkip::MissingPrice)?;
    match text.parse::<f64>() {
        Ok(price) if price.is_finite() && price >= 0.0 => Ok(price),
        _ => Err(ItemSkip::InvalidPrice),
    }
}

/// Trimmed text of a leaf, looking through `#text` of attributed elements.
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(map) => return map.get("#text").and_then(scalar_text),
        Value::Null | Value::Array(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn describe(top: &Value) -> Vec<String> {
    match top {
        Value::Object(map) => map.keys().cloned().collect(),
        Value::Array(items) => vec![format!("<array of {}>", items.len())],
        Value::Null => vec!["<empty>".to_string()],
        _ => vec!["<scalar>".to_string()],
    }
}
