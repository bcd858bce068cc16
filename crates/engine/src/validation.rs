//! Stateless bid validation: field-scoped checks run before a candidate bid
//! is considered by the application engine. All checks are evaluated; they
//! do not short-circuit.

use {
    model::money::Money,
    serde::Serialize,
    thiserror::Error,
};

/// The request field a validation failure is attributed to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BidField {
    Price,
    MaxPrice,
}

#[derive(Clone, Debug, Eq, PartialEq, Error, Serialize)]
pub enum BidValidationError {
    #[error("max_price {max_price} is below price {price}")]
    MaxPriceBelowPrice { price: Money, max_price: Money },
    #[error("price {price} is not a multiple of the rounding unit {unit}")]
    PriceNotRounded { price: Money, unit: Money },
    #[error("max_price {max_price} is not a multiple of the rounding unit {unit}")]
    MaxPriceNotRounded { max_price: Money, unit: Money },
}

impl BidValidationError {
    pub fn field(&self) -> BidField {
        match self {
            Self::PriceNotRounded { .. } => BidField::Price,
            Self::MaxPriceBelowPrice { .. } | Self::MaxPriceNotRounded { .. } => {
                BidField::MaxPrice
            }
        }
    }
}

/// Validates a candidate's prices against the configured rounding unit.
/// Returns every failure, not just the first.
pub fn validate(
    price: Option<Money>,
    max_price: Option<Money>,
    unit: Money,
) -> Vec<BidValidationError> {
    let mut errors = Vec::new();
    if let (Some(price), Some(max_price)) = (price, max_price) {
        if max_price < price {
            errors.push(BidValidationError::MaxPriceBelowPrice { price, max_price });
        }
    }
    if let Some(price) = price {
        if !price.is_aligned_to(unit) {
            errors.push(BidValidationError::PriceNotRounded { price, unit });
        }
    }
    if let Some(max_price) = max_price {
        if !max_price.is_aligned_to(unit) {
            errors.push(BidValidationError::MaxPriceNotRounded { max_price, unit });
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_bids() {
        assert!(validate(Some(Money(1200)), Some(Money(3000)), Money(100)).is_empty());
        assert!(validate(Some(Money(1200)), None, Money(100)).is_empty());
        assert!(validate(None, Some(Money(3000)), Money(100)).is_empty());
    }

    #[test]
    fn limit_below_price_is_invalid() {
        let errors = validate(Some(Money(1200)), Some(Money(1100)), Money(1));
        assert_eq!(
            errors,
            vec![BidValidationError::MaxPriceBelowPrice {
                price: Money(1200),
                max_price: Money(1100),
            }]
        );
        assert_eq!(errors[0].field(), BidField::MaxPrice);
    }

    #[test]
    fn misaligned_prices_are_invalid() {
        let errors = validate(Some(Money(1250)), Some(Money(3001)), Money(100));
        assert_eq!(
            errors,
            vec![
                BidValidationError::PriceNotRounded {
                    price: Money(1250),
                    unit: Money(100),
                },
                BidValidationError::MaxPriceNotRounded {
                    max_price: Money(3001),
                    unit: Money(100),
                },
            ]
        );
    }

    #[test]
    fn all_checks_run_even_when_the_first_fails() {
        let errors = validate(Some(Money(1250)), Some(Money(150)), Money(100));
        assert_eq!(errors.len(), 3);
    }
}
