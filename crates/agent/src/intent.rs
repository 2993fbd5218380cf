use regex::Regex;

/// Coarse classification of what the customer is asking about. Drives which
/// context gets fetched and which instruction block the prompt leads with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    OrderTracking,
    ReturnRefund,
    ProductInquiry,
    Shipping,
    Payment,
    Account,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderTracking => "order_tracking",
            Self::ReturnRefund => "return_refund",
            Self::ProductInquiry => "product_inquiry",
            Self::Shipping => "shipping",
            Self::Payment => "payment",
            Self::Account => "account",
            Self::General => "general",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub intent: Intent,
    pub order_number: Option<String>,
    pub product_query: Option<String>,
}

/// Order numbers are 4-10 digits; anything shorter or longer is more likely a
/// quantity, a date fragment, or a phone number.
const ORDER_NUMBER_MIN_DIGITS: usize = 4;
const ORDER_NUMBER_MAX_DIGITS: usize = 10;

/// Ordered, highest-confidence first. A candidate that fails the digit-length
/// check falls through to the next pattern rather than aborting extraction.
const ORDER_NUMBER_PATTERNS: [&str; 5] = [
    r"#(\d+)",
    r"(?i)order\s*#?(\d+)",
    r"(?i)order\s+is\s+#?(\d+)",
    r"(?i)tracking\s*#?(\d+)",
    r"\b(\d{4,10})\b",
];

const PRODUCT_QUERY_PATTERNS: [&str; 3] = [
    r"(?i)(?:about|looking for|interested in|want|need)\s+(?:the\s+)?([a-zA-Z0-9\s\-]+?)(?:\?|$|\.)",
    r"(?i)(?:do you have|sell|carry)\s+([a-zA-Z0-9\s\-]+?)(?:\?|$|\.)",
    r"(?i)tell me about\s+([a-zA-Z0-9\s\-]+?)(?:\?|$|\.)",
];

/// Order-status phrasing that marks a message as an order inquiry even when
/// no number was given.
const ORDER_INQUIRY_PATTERN: &str = r"(?i)where.*order|order.*status|track.*order|when.*arrive|when.*ship|delivery.*status|tracking.*number|hasn't.*arrived|still.*waiting|order.*update";

/// The classification ladder, first match wins. Order tracking is handled
/// separately because it also fires on a bare extracted order number.
const CLASSIFICATION_RULES: [(Intent, &str); 5] = [
    (Intent::ReturnRefund, r"(?i)return|refund|send back|give back"),
    (
        Intent::ProductInquiry,
        r"(?i)tell me about|information about|details about|do you have|do you sell",
    ),
    (Intent::Shipping, r"(?i)shipping|delivery|how long|when.*arrive|shipping cost"),
    (Intent::Payment, r"(?i)payment|billing|charge|credit card|pay"),
    (Intent::Account, r"(?i)account|login|password|sign in|reset"),
];

pub struct IntentExtractor {
    order_patterns: Vec<Regex>,
    product_patterns: Vec<Regex>,
    order_inquiry: Regex,
    rules: Vec<(Intent, Regex)>,
}

impl Default for IntentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentExtractor {
    pub fn new() -> Self {
        let compile = |pattern: &str| Regex::new(pattern).expect("static pattern compiles");

        Self {
            order_patterns: ORDER_NUMBER_PATTERNS.iter().map(|p| compile(p)).collect(),
            product_patterns: PRODUCT_QUERY_PATTERNS.iter().map(|p| compile(p)).collect(),
            order_inquiry: compile(ORDER_INQUIRY_PATTERN),
            rules: CLASSIFICATION_RULES
                .iter()
                .map(|(intent, pattern)| (*intent, compile(pattern)))
                .collect(),
        }
    }

    /// Pure and total: any input, including the empty string, produces a
    /// result and never panics.
    pub fn extract(&self, message: &str) -> ExtractedMessage {
        let order_number = self.extract_order_number(message);
        let product_query = self.extract_product_query(message);
        let intent = self.classify(message, order_number.is_some());

        ExtractedMessage { intent, order_number, product_query }
    }

    pub fn extract_order_number(&self, message: &str) -> Option<String> {
        for pattern in &self.order_patterns {
            if let Some(captures) = pattern.captures(message) {
                if let Some(digits) = captures.get(1) {
                    let digits = digits.as_str();
                    if (ORDER_NUMBER_MIN_DIGITS..=ORDER_NUMBER_MAX_DIGITS).contains(&digits.len())
                    {
                        return Some(digits.to_string());
                    }
                }
            }
        }
        None
    }

    pub fn extract_product_query(&self, message: &str) -> Option<String> {
        for pattern in &self.product_patterns {
            if let Some(captures) = pattern.captures(message) {
                if let Some(query) = captures.get(1) {
                    let trimmed = query.as_str().trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
        }
        None
    }

    fn classify(&self, message: &str, has_order_number: bool) -> Intent {
        if has_order_number || self.order_inquiry.is_match(message) {
            return Intent::OrderTracking;
        }

        for (intent, pattern) in &self.rules {
            if pattern.is_match(message) {
                return *intent;
            }
        }

        Intent::General
    }

    /// The ladder in priority order, exposed so coverage and ordering can be
    /// asserted in isolation.
    pub fn classification_rules(&self) -> impl Iterator<Item = Intent> + '_ {
        self.rules.iter().map(|(intent, _)| *intent)
    }
}

#[cfg(test)]
mod tests {
    use super::{Intent, IntentExtractor};

    fn extractor() -> IntentExtractor {
        IntentExtractor::new()
    }

    #[test]
    fn hash_prefixed_numbers_are_extracted_exactly() {
        let extractor = extractor();
        for (message, expected) in [
            ("Where is #1234?", "1234"),
            ("my order #00451 hasn't shipped", "00451"),
            ("ref #1234567890 please", "1234567890"),
        ] {
            assert_eq!(extractor.extract_order_number(message).as_deref(), Some(expected));
        }
    }

    #[test]
    fn short_and_long_digit_runs_are_discarded() {
        let extractor = extractor();
        assert_eq!(extractor.extract_order_number("item #123"), None);
        assert_eq!(extractor.extract_order_number("serial 12345678901 is broken"), None);
        assert_eq!(extractor.extract_order_number("no digits here"), None);
    }

    #[test]
    fn order_phrasings_are_recognized() {
        let extractor = extractor();
        assert_eq!(extractor.extract_order_number("order 4521").as_deref(), Some("4521"));
        assert_eq!(extractor.extract_order_number("my order is #8811").as_deref(), Some("8811"));
        assert_eq!(extractor.extract_order_number("tracking 990011").as_deref(), Some("990011"));
        assert_eq!(extractor.extract_order_number("it was 55123 I think").as_deref(), Some("55123"));
    }

    #[test]
    fn product_queries_capture_and_trim_the_subject() {
        let extractor = extractor();
        assert_eq!(
            extractor.extract_product_query("I'm looking for wool socks.").as_deref(),
            Some("wool socks")
        );
        assert_eq!(
            extractor.extract_product_query("do you have gift cards?").as_deref(),
            Some("gift cards")
        );
        assert_eq!(
            extractor.extract_product_query("tell me about the trail runner 2").as_deref(),
            Some("trail runner 2")
        );
        assert_eq!(extractor.extract_product_query("hello there"), None);
    }

    #[test]
    fn classifies_order_tracking_from_number_or_phrasing() {
        let extractor = extractor();
        assert_eq!(extractor.extract("Where is my order #1234?").intent, Intent::OrderTracking);
        assert_eq!(extractor.extract("my package still waiting").intent, Intent::OrderTracking);
    }

    #[test]
    fn classifies_remaining_ladder_rungs_in_priority_order() {
        let extractor = extractor();
        assert_eq!(extractor.extract("I want a refund for this").intent, Intent::ReturnRefund);
        assert_eq!(extractor.extract("do you sell rain jackets").intent, Intent::ProductInquiry);
        assert_eq!(extractor.extract("how long is delivery to Ohio").intent, Intent::Shipping);
        assert_eq!(extractor.extract("my credit card was declined").intent, Intent::Payment);
        assert_eq!(extractor.extract("I can't sign in anymore").intent, Intent::Account);
        assert_eq!(extractor.extract("hello!").intent, Intent::General);
    }

    #[test]
    fn refund_outranks_payment_when_both_match() {
        // "refund" and "charge" both appear; the ladder puts returns first.
        let extractor = extractor();
        assert_eq!(
            extractor.extract("refund the charge on my credit card").intent,
            Intent::ReturnRefund
        );
    }

    #[test]
    fn ladder_order_is_stable() {
        let order: Vec<Intent> = extractor().classification_rules().collect();
        assert_eq!(
            order,
            vec![
                Intent::ReturnRefund,
                Intent::ProductInquiry,
                Intent::Shipping,
                Intent::Payment,
                Intent::Account,
            ]
        );
    }

    #[test]
    fn empty_input_is_general_with_no_entities() {
        let extracted = extractor().extract("");
        assert_eq!(extracted.intent, Intent::General);
        assert_eq!(extracted.order_number, None);
        assert_eq!(extracted.product_query, None);
    }
}
