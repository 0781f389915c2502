use serde::{Deserialize, Serialize};

/// Deserialize a field that can be either a JSON number or a numeric string.
/// Fractions round to the nearest integer; empty or non-numeric strings
/// become `None`.
mod number_or_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumberOrString {
            Int(i64),
            Float(f64),
            String(String),
        }

        let opt = Option::<NumberOrString>::deserialize(deserializer)?;
        Ok(opt.and_then(|v| match v {
            NumberOrString::Int(n) => Some(n),
            NumberOrString::Float(f) => round_float(f),
            NumberOrString::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(round_float))
            }
        }))
    }

    /// Fractional values round to the nearest integer, whether they arrive as
    /// a number or as text.
    fn round_float(f: f64) -> Option<i64> {
        f.is_finite().then(|| f.round() as i64)
    }

    pub fn serialize<S>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(n) => serializer.serialize_some(n),
            None => serializer.serialize_none(),
        }
    }
}

/// Deserialize a textual field that the catalog sometimes sends as a number
/// (page counts, prices).
mod text_or_number {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum TextOrNumber {
            Text(String),
            Number(serde_json::Number),
        }

        let opt = Option::<TextOrNumber>::deserialize(deserializer)?;
        Ok(opt.map(|v| match v {
            TextOrNumber::Text(s) => s,
            TextOrNumber::Number(n) => n.to_string(),
        }))
    }
}

/// Book metadata as returned by the upstream catalog.
///
/// Field names on the wire follow the catalog's JSON; the same shape is what
/// gets written into the cache and returned to HTTP clients.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct BookDetails {
    /// International identifier
    #[serde(with = "number_or_string", default)]
    pub id: Option<i64>,
    /// Title
    #[serde(default)]
    pub name: Option<String>,
    /// Subtitle
    #[serde(default)]
    pub subname: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub translator: Option<String>,
    /// Publisher
    #[serde(default)]
    pub publishing: Option<String>,
    /// Publish date, free-form
    #[serde(default)]
    pub published: Option<String>,
    /// Binding
    #[serde(default)]
    pub designed: Option<String>,
    /// ISBN as printed
    #[serde(default)]
    pub code: Option<String>,
    /// Catalog-side book id
    #[serde(with = "number_or_string", default)]
    pub douban: Option<i64>,
    /// Catalog rating, 0 to 100
    #[serde(rename = "doubanScore", with = "number_or_string", default)]
    pub douban_score: Option<i64>,
    /// Number of ratings
    #[serde(rename = "numScore", with = "number_or_string", default)]
    pub num_score: Option<i64>,
    /// Series
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(deserialize_with = "text_or_number::deserialize", default)]
    pub pages: Option<String>,
    /// Remote cover URL from upstream; a local filename once processed
    #[serde(rename = "photoUrl", default)]
    pub photo_url: Option<String>,
    #[serde(deserialize_with = "text_or_number::deserialize", default)]
    pub price: Option<String>,
    #[serde(rename = "authorIntro", default)]
    pub author_intro: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl BookDetails {
    /// Remote cover URL, if the catalog supplied a non-empty one.
    pub fn cover_url(&self) -> Option<&str> {
        self.photo_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Envelope returned by the catalog: the metadata sits under `data`.
#[derive(Deserialize, Debug)]
pub struct CatalogResponse {
    pub data: Option<BookDetails>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_mixed_numeric_fields() {
        let details: BookDetails = serde_json::from_value(json!({
            "id": "9787111213826",
            "name": "Thinking in Java",
            "douban": 2130190,
            "doubanScore": "91",
            "numScore": 1500.0,
            "pages": 880,
            "price": "108.00",
            "photoUrl": "https://img.example.com/view/subject/s2553047.jpg"
        }))
        .unwrap();

        assert_eq!(details.id, Some(9787111213826));
        assert_eq!(details.douban, Some(2130190));
        assert_eq!(details.douban_score, Some(91));
        assert_eq!(details.num_score, Some(1500));
        assert_eq!(details.pages.as_deref(), Some("880"));
        assert_eq!(details.price.as_deref(), Some("108.00"));
        assert!(details.translator.is_none());
    }

    #[test]
    fn test_unparseable_number_is_none() {
        let details: BookDetails =
            serde_json::from_value(json!({ "doubanScore": "", "id": null })).unwrap();
        assert_eq!(details.douban_score, None);
        assert_eq!(details.id, None);
    }

    #[test]
    fn test_fractional_scores_agree_across_json_types() {
        let as_text: BookDetails =
            serde_json::from_value(json!({ "doubanScore": "8.9", "numScore": " 12.2 " })).unwrap();
        let as_number: BookDetails =
            serde_json::from_value(json!({ "doubanScore": 8.9, "numScore": 12.2 })).unwrap();

        assert_eq!(as_text.douban_score, Some(9));
        assert_eq!(as_text.num_score, Some(12));
        assert_eq!(as_text.douban_score, as_number.douban_score);
        assert_eq!(as_text.num_score, as_number.num_score);

        let not_a_number: BookDetails =
            serde_json::from_value(json!({ "doubanScore": "NaN" })).unwrap();
        assert_eq!(not_a_number.douban_score, None);
    }

    #[test]
    fn test_cover_url_ignores_blank() {
        let mut details = BookDetails {
            photo_url: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(details.cover_url().is_none());

        details.photo_url = Some("http://cdn/x/abc123.jpg".to_string());
        assert_eq!(details.cover_url(), Some("http://cdn/x/abc123.jpg"));
    }

    #[test]
    fn test_serialized_form_uses_wire_names() {
        let details = BookDetails {
            douban_score: Some(80),
            photo_url: Some("abc123.jpg".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&details).unwrap();
        assert_eq!(value["doubanScore"], json!(80));
        assert_eq!(value["photoUrl"], json!("abc123.jpg"));

        let back: BookDetails = serde_json::from_value(value).unwrap();
        assert_eq!(back, details);
    }
}
