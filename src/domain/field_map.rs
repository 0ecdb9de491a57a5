use serde::Deserialize;

/// Which price column becomes the observation's price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSelection {
    #[default]
    Regular,
    /// Use `promo_price` when the item carries a valid one, else `price`.
    Promotional,
}

/// Container holding items nested inside another item (promotion feeds).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NestedItems {
    pub container: String,
    pub element: String,
}

/// Per-retailer mapping from source field names to the record schema.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMap {
    #[serde(default = "default_item_lists")]
    pub item_lists: Vec<String>,
    #[serde(default = "default_item_elements")]
    pub item_elements: Vec<String>,
    #[serde(default = "default_groups")]
    pub groups: Vec<String>,
    #[serde(default)]
    pub nested_items: Option<NestedItems>,
    #[serde(default = "default_barcode")]
    pub barcode: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_price")]
    pub price: String,
    #[serde(default)]
    pub promo_price: Option<String>,
    #[serde(default)]
    pub promotion: Option<String>,
    #[serde(default)]
    pub price_selection: PriceSelection,
}

fn default_item_lists() -> Vec<String> {
    vec!["Items".to_string(), "Products".to_string()]
}
fn default_item_elements() -> Vec<String> {
    vec!["Item".to_string(), "Product".to_string()]
}
fn default_groups() -> Vec<String> {
    vec![
        "Category".to_string(),
        "SubCategory".to_string(),
        "SubCategories".to_string(),
    ]
}
fn default_barcode() -> String {
    "ItemCode".to_string()
}
fn default_name() -> String {
    "ItemName".to_string()
}
fn default_price() -> String {
    "ItemPrice".to_string()
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            item_lists: default_item_lists(),
            item_elements: default_item_elements(),
            groups: default_groups(),
            nested_items: None,
            barcode: default_barcode(),
            name: default_name(),
            category: None,
            image: None,
            price: default_price(),
            promo_price: None,
            promotion: None,
            price_selection: PriceSelection::Regular,
        }
    }
}

impl FieldMap {
    pub fn is_item_list(&self, key: &str) -> bool {
        self.item_lists.iter().any(|k| k == key)
    }

    pub fn is_group(&self, key: &str) -> bool {
        self.groups.iter().any(|k| k == key)
    }
}
