use crate::fixedpoint::ScaledPrice;

/// BUY or SELL for ledger transactions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TxKind {
    Buy,
    Sell,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Buy => "BUY",
            TxKind::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(TxKind::Buy),
            "SELL" => Some(TxKind::Sell),
            _ => None,
        }
    }
}

/// One owner's current holding of one tracked entity.
///
/// `price` is the persisted scaled price at read time; `None` when the
/// entity has never been priced.
#[derive(Clone, Debug, PartialEq)]
pub struct Holding {
    pub entity_id: i64,
    pub symbol: Option<String>,
    pub quantity: f64,
    pub price: Option<ScaledPrice>,
}

impl Holding {
    pub fn new(entity_id: i64, quantity: f64, price: Option<ScaledPrice>) -> Self {
        Self {
            entity_id,
            symbol: None,
            quantity,
            price,
        }
    }

    pub fn with_symbol<S: Into<String>>(mut self, symbol: S) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// A holding counts as a position only while quantity is non-zero.
    pub fn is_open(&self) -> bool {
        self.quantity.abs() > f64::EPSILON
    }

    /// Market value; `None` when unpriced.
    pub fn market_value(&self) -> Option<f64> {
        self.price.map(|p| p.value_of(self.quantity))
    }
}

/// A historical BUY/SELL transaction.
///
/// quantity is always positive.
/// amount is the gross cash amount of the trade (quantity × price), >= 0.
/// fees is the absolute fee paid (>= 0).
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub entity_id: i64,
    pub kind: TxKind,
    pub quantity: f64,
    pub amount: f64,
    pub fees: f64,
}

impl Transaction {
    pub fn new(entity_id: i64, kind: TxKind, quantity: f64, amount: f64, fees: f64) -> Self {
        debug_assert!(quantity > 0.0, "Transaction.quantity must be > 0");
        debug_assert!(amount >= 0.0, "Transaction.amount must be >= 0");
        debug_assert!(fees >= 0.0, "Transaction.fees must be >= 0");
        Self {
            entity_id,
            kind,
            quantity,
            amount,
            fees,
        }
    }

    pub fn buy(entity_id: i64, quantity: f64, amount: f64) -> Self {
        Self::new(entity_id, TxKind::Buy, quantity, amount, 0.0)
    }

    pub fn sell(entity_id: i64, quantity: f64, amount: f64) -> Self {
        Self::new(entity_id, TxKind::Sell, quantity, amount, 0.0)
    }
}
