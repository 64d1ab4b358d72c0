//! In-process `metrics` recorder that keeps running totals per series.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};

#[derive(Debug, Default)]
struct Series {
    count: AtomicU64,
    sum: Mutex<f64>,
}

impl Series {
    fn add(&self, value: f64) {
        *self.sum.lock().unwrap_or_else(PoisonError::into_inner) += value;
    }
}

impl CounterFn for Series {
    fn increment(&self, value: u64) {
        self.count.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.count.fetch_max(value, Ordering::Relaxed);
    }
}

impl GaugeFn for Series {
    fn increment(&self, value: f64) {
        self.add(value);
    }

    fn decrement(&self, value: f64) {
        self.add(-value);
    }

    fn set(&self, value: f64) {
        *self.sum.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

impl HistogramFn for Series {
    fn record(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.add(value);
    }
}

/// Totals for one series: counter value or sample count, and sample sum.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Totals {
    pub count: u64,
    pub sum: f64,
}

/// Clones share the same series, so one handle can be installed globally
/// while another reads the totals.
#[derive(Clone, Debug, Default)]
pub struct TotalsRecorder {
    series: Arc<Mutex<BTreeMap<String, Arc<Series>>>>,
}

impl TotalsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn series(&self, key: &Key) -> Arc<Series> {
        let mut series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(series.entry(render_key(key)).or_default())
    }

    /// `name` as rendered by [`render_key`], e.g. `sale.burns.total` or
    /// `sale.transactions.total{kind=purchase,status=success}`.
    pub fn totals(&self, name: &str) -> Totals {
        let series = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        series.get(name).map_or_else(Totals::default, |series| Totals {
            count: series.count.load(Ordering::Relaxed),
            sum: *series.sum.lock().unwrap_or_else(PoisonError::into_inner),
        })
    }

    pub fn snapshot(&self) -> Vec<(String, Totals)> {
        let names: Vec<String> = self
            .series
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names
            .into_iter()
            .map(|name| {
                let totals = self.totals(&name);
                (name, totals)
            })
            .collect()
    }
}

/// Series name followed by its labels, sorted by label key.
pub fn render_key(key: &Key) -> String {
    let mut labels: Vec<(&str, &str)> = key.labels().map(|l| (l.key(), l.value())).collect();
    if labels.is_empty() {
        return key.name().to_string();
    }
    labels.sort();
    let labels: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}{{{}}}", key.name(), labels.join(","))
}

impl Recorder for TotalsRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(self.series(key))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(self.series(key))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(self.series(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, Transaction};
    use crate::config::SaleConfig;
    use crate::contracts::SaleError;
    use crate::deploy::deploy;
    use crate::ledger::{Address, UNIT};
    use crate::TxError;

    #[test]
    fn labels_render_in_key_order() {
        let key = Key::from_parts(
            "sale.transactions.total",
            vec![
                metrics::Label::new("status", "failed"),
                metrics::Label::new("kind", "purchase"),
            ],
        );
        assert_eq!(
            render_key(&key),
            "sale.transactions.total{kind=purchase,status=failed}"
        );
        assert_eq!(render_key(&Key::from_name("sale.burns.total")), "sale.burns.total");
    }

    #[test]
    fn chain_reports_purchases_and_failures() {
        let recorder = TotalsRecorder::new();
        let buyer = Address::derive(b"account", b"buyer");
        let config = SaleConfig::new(100, 200, Address::derive(b"account", b"treasury"));

        metrics::with_local_recorder(&recorder, || {
            let mut chain = Chain::genesis([(buyer, 10 * UNIT)]);
            deploy(&mut chain, Address::derive(b"account", b"deployer"), &config, 0).unwrap();
            let purchase = Transaction::Purchase {
                value: UNIT,
                referrer: None,
            };
            chain.execute(buyer, purchase.clone(), 150).unwrap();
            chain.execute(buyer, purchase.clone(), 150).unwrap();
            assert_eq!(
                chain.execute(buyer, purchase, 50).unwrap_err(),
                TxError::Sale(SaleError::SaleNotStarted)
            );
        });

        assert_eq!(recorder.totals("sale.purchases.total").count, 2);
        assert_eq!(
            recorder
                .totals("sale.transactions.total{kind=purchase,status=success}")
                .count,
            2
        );
        assert_eq!(
            recorder
                .totals("sale.transactions.total{kind=purchase,status=failed}")
                .count,
            1
        );
        let credited = recorder.totals("sale.purchase.credited");
        assert_eq!(credited.count, 2);
        assert_eq!(credited.sum, 2.0 * (3 * UNIT / 10) as f64);
        assert_eq!(recorder.totals("sale.burns.total"), Totals::default());
    }
}
