use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    pub symbol: String,
    pub name: String,
}

const SUPPORTED: [(&str, &str, &str); 12] = [
    ("USD", "$", "US Dollar"),
    ("EUR", "€", "Euro"),
    ("JPY", "¥", "Japanese Yen"),
    ("GBP", "£", "British Pound"),
    ("AUD", "A$", "Australian Dollar"),
    ("CAD", "C$", "Canadian Dollar"),
    ("INR", "₹", "Indian Rupee"),
    ("LKR", "Rs", "Sri Lankan Rupee"),
    ("BDT", "৳", "Bangladeshi Taka"),
    ("PKR", "Rs", "Pakistani Rupee"),
    ("IDR", "Rp", "Indonesian Rupiah"),
    ("MYR", "RM", "Malaysian Ringgit"),
];

pub fn supported_currencies() -> Vec<Currency> {
    SUPPORTED
        .iter()
        .map(|(code, symbol, name)| Currency {
            code: (*code).to_string(),
            symbol: (*symbol).to_string(),
            name: (*name).to_string(),
        })
        .collect()
}

pub fn find_currency(code: &str) -> Option<Currency> {
    supported_currencies()
        .into_iter()
        .find(|currency| currency.code.eq_ignore_ascii_case(code))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub currency: Currency,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            currency: Currency {
                code: "USD".to_string(),
                symbol: "$".to_string(),
                name: "US Dollar".to_string(),
            },
        }
    }
}
