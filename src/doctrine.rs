//! DoctrineEvaluator (C6): expands fits into stock-availability rows.
//!
//! Grounded on `original_source/doctrine_monitor.py`'s groupby-sum over
//! exploded fit components and the per-fit min() roll-up that identifies
//! the binding component.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::warn;

use crate::catalog::TypeCatalog;
use crate::models::{DoctrineRow, DoctrineSummary, Fit, Stat};

pub fn evaluate(fits: &[Fit], stats: &[Stat], target: i64, catalog: &TypeCatalog) -> Vec<DoctrineRow> {
    let stats_by_type: HashMap<i64, &Stat> = stats.iter().map(|s| (s.type_id, s)).collect();
    let timestamp = Utc::now();
    let mut rows = Vec::new();

    for fit in fits {
        if fit.components.is_empty() {
            warn!(fit_id = fit.fit_id, fit_name = %fit.fit_name, "fit has no components, dropping");
            continue;
        }
        let components = expand_components(fit);

        for (type_id, quantity_required) in components {
            let stat = stats_by_type.get(&type_id);
            let stock = stat.map_or(0, |s| s.total_volume_remain);
            let fits_on_market = if quantity_required > 0 {
                stock / quantity_required
            } else {
                0
            };
            let delta = fits_on_market - target;
            let info = catalog.lookup_or_blank(type_id);

            rows.push(DoctrineRow {
                fit_id: fit.fit_id,
                type_id,
                doctrine_id: fit.doctrine_id,
                doctrine_name: fit.doctrine_name.clone(),
                fit_name: fit.fit_name.clone(),
                ship_type_id: fit.ship_type_id,
                ship_type_name: fit.ship_type_name.clone(),
                type_name: info.type_name,
                category_id: info.category_id,
                category_name: info.category_name,
                group_id: info.group_id,
                group_name: info.group_name,
                quantity_required,
                stock,
                fits_on_market,
                delta,
                price_low_percentile: stat.map_or(Decimal::ZERO, |s| s.price_low_percentile),
                avg_daily_volume: stat.map_or(Decimal::ZERO, |s| s.avg_daily_volume),
                avg_of_avg_price: stat.map_or(Decimal::ZERO, |s| s.avg_of_avg_price),
                days_remaining: stat.map_or(Decimal::ZERO, |s| s.days_remaining),
                timestamp,
            });
        }
    }

    rows
}

/// Group-sums duplicate components and injects the hull if it is not
/// already present among them (spec.md §4.6 step 2).
fn expand_components(fit: &Fit) -> Vec<(i64, i64)> {
    let mut by_type: HashMap<i64, i64> = HashMap::new();
    for component in &fit.components {
        *by_type.entry(component.type_id).or_insert(0) += component.quantity;
    }
    by_type.entry(fit.ship_type_id).or_insert(1);
    by_type.into_iter().collect()
}

/// The per-fit binding-constraint summary: the minimum `fits_on_market`
/// across that fit's rows.
pub fn summarize(rows: &[DoctrineRow]) -> Vec<DoctrineSummary> {
    let mut by_fit: HashMap<i64, i64> = HashMap::new();
    for row in rows {
        by_fit
            .entry(row.fit_id)
            .and_modify(|min| *min = (*min).min(row.fits_on_market))
            .or_insert(row.fits_on_market);
    }

    by_fit
        .into_iter()
        .map(|(fit_id, min_fits_on_market)| DoctrineSummary {
            fit_id,
            doctrine_name_is_known: true,
            min_fits_on_market,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FitComponent, TypeInfo};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn stat(type_id: i64, stock: i64) -> Stat {
        Stat {
            type_id,
            total_volume_remain: stock,
            min_price: dec!(0),
            price_low_percentile: dec!(0),
            avg_of_avg_price: dec!(0),
            avg_daily_volume: dec!(0),
            days_remaining: dec!(0),
            type_name: String::new(),
            group_id: 0,
            group_name: String::new(),
            category_id: 0,
            category_name: String::new(),
            comparator_sell: None,
            comparator_buy: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn doctrine_shortfall_matches_e4() {
        let fit = Fit {
            fit_id: 1,
            fit_name: "F".to_string(),
            ship_type_id: 999,
            ship_type_name: "Hull".to_string(),
            doctrine_id: 1,
            doctrine_name: "Main".to_string(),
            components: vec![
                FitComponent { type_id: 1, quantity: 1 },
                FitComponent { type_id: 2, quantity: 4 },
                FitComponent { type_id: 999, quantity: 1 },
            ],
        };
        let stats = vec![stat(1, 100), stat(2, 40), stat(999, 5)];
        let catalog = TypeCatalog::new(vec![]);

        let rows = evaluate(&[fit], &stats, 20, &catalog);
        assert_eq!(rows.len(), 3);

        let row_a = rows.iter().find(|r| r.type_id == 1).unwrap();
        assert_eq!(row_a.fits_on_market, 100);
        assert_eq!(row_a.delta, 80);

        let row_b = rows.iter().find(|r| r.type_id == 2).unwrap();
        assert_eq!(row_b.fits_on_market, 10);
        assert_eq!(row_b.delta, -10);

        let row_hull = rows.iter().find(|r| r.type_id == 999).unwrap();
        assert_eq!(row_hull.fits_on_market, 5);
        assert_eq!(row_hull.delta, -15);

        let summaries = summarize(&rows);
        assert_eq!(summaries[0].min_fits_on_market, 5);
    }

    #[test]
    fn hull_is_injected_when_absent_from_components() {
        let fit = Fit {
            fit_id: 2,
            fit_name: "G".to_string(),
            ship_type_id: 50,
            ship_type_name: "Hull".to_string(),
            doctrine_id: 1,
            doctrine_name: "Main".to_string(),
            components: vec![FitComponent { type_id: 10, quantity: 2 }],
        };
        let stats = vec![stat(10, 10), stat(50, 3)];
        let catalog = TypeCatalog::new(vec![TypeInfo {
            type_id: 50,
            type_name: "Hull Type".into(),
            ..Default::default()
        }]);

        let rows = evaluate(&[fit], &stats, 20, &catalog);
        assert_eq!(rows.len(), 2);

        let row_x = rows.iter().find(|r| r.type_id == 10).unwrap();
        assert_eq!(row_x.quantity_required, 2);
        assert_eq!(row_x.fits_on_market, 5);

        let row_hull = rows.iter().find(|r| r.type_id == 50).unwrap();
        assert_eq!(row_hull.quantity_required, 1);
        assert_eq!(row_hull.fits_on_market, 3);
    }

    #[test]
    fn fit_with_no_components_is_dropped() {
        let fit = Fit {
            fit_id: 3,
            fit_name: "Empty".to_string(),
            ship_type_id: 0,
            ship_type_name: String::new(),
            doctrine_id: 1,
            doctrine_name: "Main".to_string(),
            components: vec![],
        };
        let catalog = TypeCatalog::new(vec![]);
        let rows = evaluate(&[fit], &[], 20, &catalog);
        assert!(rows.is_empty());
    }
}
