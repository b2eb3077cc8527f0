use crate::real;

pub const EXP_TABLE_SIZE: usize = 1000;
pub const MAX_EXP: real = 6.0;

/// Precomputed logistic function on `[-MAX_EXP, MAX_EXP)`.
pub struct ExpTable {
    table: Vec<real>,
}

impl Default for ExpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpTable {
    pub fn new() -> Self {
        let table = (0..EXP_TABLE_SIZE)
            .map(|i| {
                let e = ((i as real / EXP_TABLE_SIZE as real * 2.0 - 1.0) * MAX_EXP).exp(); // Precompute the exp() table
                e / (e + 1.0) // Precompute f(x) = x / (x + 1)
            })
            .collect();
        ExpTable { table }
    }

    /// Approximate the logistic function, 1 / (1 + e^-x), saturating to 0
    /// and 1 outside the table.
    pub fn sigmoid(&self, x: real) -> real {
        if x >= MAX_EXP {
            1.0
        } else if x <= -MAX_EXP {
            0.0
        } else {
            let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as real / MAX_EXP / 2.0)) as usize;
            self.table[i.min(EXP_TABLE_SIZE - 1)]
        }
    }
}
