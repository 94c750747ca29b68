//! Solar photospheric abundances, Asplund, Grevesse, Sauval & Scott (2009).
//!
//! Values are `log ε = log(N_X / N_H) + 12`, indexed by atomic number.

/// `(Z, log ε)` pairs. Elements without a photospheric value are omitted.
const ASPLUND_2009: &[(u32, f64)] = &[
    (1, 12.00),
    (2, 10.93),
    (3, 1.05),
    (4, 1.38),
    (5, 2.70),
    (6, 8.43),
    (7, 7.83),
    (8, 8.69),
    (9, 4.56),
    (10, 7.93),
    (11, 6.24),
    (12, 7.60),
    (13, 6.45),
    (14, 7.51),
    (15, 5.41),
    (16, 7.12),
    (17, 5.50),
    (18, 6.40),
    (19, 5.03),
    (20, 6.34),
    (21, 3.15),
    (22, 4.95),
    (23, 3.93),
    (24, 5.64),
    (25, 5.43),
    (26, 7.50),
    (27, 4.99),
    (28, 6.22),
    (29, 4.19),
    (30, 4.56),
    (31, 3.04),
    (32, 3.65),
    (36, 3.25),
    (37, 2.52),
    (38, 2.87),
    (39, 2.21),
    (40, 2.58),
    (41, 1.46),
    (42, 1.88),
    (44, 1.75),
    (45, 0.91),
    (46, 1.57),
    (47, 0.94),
    (49, 0.80),
    (50, 2.04),
    (54, 2.24),
    (56, 2.18),
    (57, 1.10),
    (58, 1.58),
    (59, 0.72),
    (60, 1.42),
    (62, 0.96),
    (63, 0.52),
    (64, 1.07),
    (65, 0.30),
    (66, 1.10),
    (67, 0.48),
    (68, 0.92),
    (69, 0.10),
    (70, 0.84),
    (71, 0.10),
    (72, 0.85),
    (74, 0.85),
    (76, 1.40),
    (77, 1.38),
    (79, 0.92),
    (81, 0.90),
    (82, 1.75),
    (90, 0.02),
];

/// Solar abundance of element `z`, if tabulated.
pub fn solar_abundance(z: u32) -> Option<f64> {
    ASPLUND_2009
        .binary_search_by_key(&z, |&(element, _)| element)
        .ok()
        .map(|i| ASPLUND_2009[i].1)
}

/// Source of reference solar abundances for the abundance-offset diagnostic.
pub trait SolarAbundances {
    fn abundance(&self, element: u32) -> Option<f64>;
}

/// The built-in Asplund et al. (2009) table.
#[derive(Debug, Clone, Copy, Default)]
pub struct Asplund2009;

impl SolarAbundances for Asplund2009 {
    fn abundance(&self, element: u32) -> Option<f64> {
        solar_abundance(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_and_lookups_work() {
        assert!(ASPLUND_2009.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(solar_abundance(26), Some(7.50));
        assert_eq!(Asplund2009.abundance(1), Some(12.00));
        assert_eq!(solar_abundance(43), None);
    }
}
