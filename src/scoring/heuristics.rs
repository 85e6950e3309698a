use crate::models::{JobTemplate, Listing};

/// Tolerated overshoot above the target price, and the size bonus threshold
/// above the minimum square footage.
pub const PRICE_COST_BOUND: f64 = 1.25;

const BEDROOM_PREFERENCE_MULTIPLIER: f64 = 1.5;
const BATHROOM_PREFERENCE_MULTIPLIER: f64 = 1.5;

/// The subset of template criteria the heuristic pass scores against.
/// Unset targets contribute nothing, in score or trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreTargets {
    pub target_price: Option<i64>,
    pub min_square_feet: Option<i64>,
    pub min_bedrooms: Option<i64>,
    pub min_bathrooms: Option<f64>,
}

impl ScoreTargets {
    pub fn from_template(template: &JobTemplate) -> Self {
        Self {
            target_price: template.target_price,
            min_square_feet: template.min_square_feet,
            min_bedrooms: template.min_bedrooms,
            min_bathrooms: template.min_bathrooms,
        }
    }
}

/// Deterministic rule-based score. Each contributing rule appends one clause;
/// the trace is the `" | "`-joined clause list in rule order.
pub fn evaluate_heuristics(listing: &Listing, targets: &ScoreTargets) -> (f64, String) {
    let mut score = 0.0;
    let mut trace: Vec<String> = Vec::new();

    if let Some(target) = targets.target_price {
        if listing.price < target {
            score += 10.0;
            trace.push(format!("Good price under ${}", target));
        } else if (listing.price as f64) < target as f64 * PRICE_COST_BOUND {
            score += 5.0;
            trace.push(format!(
                "Moderate price under ${}",
                target as f64 * PRICE_COST_BOUND
            ));
        }
    }

    if let Some(min_sqft) = targets.min_square_feet {
        if listing.square_footage as f64 > min_sqft as f64 * PRICE_COST_BOUND {
            score += 10.0;
            trace.push(format!("Good size at {}sqft", listing.square_footage));
        } else if listing.square_footage > min_sqft {
            score += 5.0;
            trace.push(format!("Moderate size at {}sqft", listing.square_footage));
        }
    }

    if let Some(min_bedrooms) = targets.min_bedrooms {
        if listing.bedrooms > min_bedrooms {
            score +=
                5.0 + (listing.bedrooms - min_bedrooms) as f64 * BEDROOM_PREFERENCE_MULTIPLIER;
            trace.push(format!("Good number of bedrooms: {}", listing.bedrooms));
        } else if listing.bedrooms == min_bedrooms {
            score += 5.0;
            trace.push(format!("Moderate number of bedrooms: {}", listing.bedrooms));
        }
    }

    if let Some(min_bathrooms) = targets.min_bathrooms {
        if listing.bathrooms > min_bathrooms {
            score += 5.0 + (listing.bathrooms - min_bathrooms) * BATHROOM_PREFERENCE_MULTIPLIER;
            trace.push(format!("Good number of bathrooms: {}", listing.bathrooms));
        } else if listing.bathrooms == min_bathrooms {
            score += 5.0;
            trace.push(format!("Moderate number of bathrooms: {}", listing.bathrooms));
        }
    }

    (score, trace.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(price: i64, sqft: i64, bedrooms: i64, bathrooms: f64) -> Listing {
        Listing {
            hash: "h".to_string(),
            post_id: "p".to_string(),
            title: "t".to_string(),
            price,
            bedrooms,
            bathrooms,
            square_footage: sqft,
            location: String::new(),
            neighborhood: String::new(),
            description: String::new(),
            image_urls: Vec::new(),
            url: String::new(),
        }
    }

    fn targets() -> ScoreTargets {
        ScoreTargets {
            target_price: Some(2000),
            min_square_feet: Some(1000),
            min_bedrooms: Some(4),
            min_bathrooms: Some(2.0),
        }
    }

    #[test]
    fn every_rule_contributes_in_order() {
        let (score, trace) = evaluate_heuristics(&listing(1900, 1300, 5, 2.0), &targets());
        assert_eq!(score, 31.5);
        assert_eq!(
            trace,
            "Good price under $2000 | Good size at 1300sqft | \
             Good number of bedrooms: 5 | Moderate number of bathrooms: 2"
        );
        assert_eq!(trace.split(" | ").count(), 4);
    }

    #[test]
    fn moderate_price_band_extends_to_the_cost_bound() {
        let (score, trace) = evaluate_heuristics(&listing(2200, 0, 0, 0.0), &targets());
        assert_eq!(score, 5.0);
        assert_eq!(trace, "Moderate price under $2500");

        // At the bound itself nothing is awarded
        let (score, trace) = evaluate_heuristics(&listing(2500, 0, 0, 0.0), &targets());
        assert_eq!(score, 0.0);
        assert!(trace.is_empty());
    }

    #[test]
    fn sqft_at_the_minimum_earns_nothing() {
        let (score, _) = evaluate_heuristics(&listing(9999, 1000, 0, 0.0), &targets());
        assert_eq!(score, 0.0);

        let (score, trace) = evaluate_heuristics(&listing(9999, 1001, 0, 0.0), &targets());
        assert_eq!(score, 5.0);
        assert_eq!(trace, "Moderate size at 1001sqft");
    }

    #[test]
    fn extra_rooms_scale_the_bonus() {
        let (score, trace) = evaluate_heuristics(&listing(9999, 0, 6, 2.5), &targets());
        // 5 + 2*1.5 bedrooms, 5 + 0.5*1.5 bathrooms
        assert_eq!(score, 8.0 + 5.75);
        assert_eq!(
            trace,
            "Good number of bedrooms: 6 | Good number of bathrooms: 2.5"
        );
    }

    #[test]
    fn unset_targets_are_skipped_entirely() {
        let (score, trace) = evaluate_heuristics(&listing(1, 9999, 9, 9.0), &ScoreTargets::default());
        assert_eq!(score, 0.0);
        assert!(trace.is_empty());
    }

    #[test]
    fn rooms_below_minimum_earn_nothing() {
        let (score, trace) = evaluate_heuristics(&listing(9999, 0, 3, 1.5), &targets());
        assert_eq!(score, 0.0);
        assert!(trace.is_empty());
    }
}
