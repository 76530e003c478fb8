use std::hint::black_box;

use rand::Rng;

/// Saturate one core with floating point work until the process is killed.
pub fn stress_cpu() -> ! {
    let mut rng = rand::rng();
    loop {
        black_box(spin(&mut rng, 1_000_000));
    }
}

/// Take `rounds` square roots of random values.
fn spin(rng: &mut impl Rng, rounds: u64) -> f64 {
    (0..rounds).fold(0.0, |acc, _| acc + black_box(rng.random::<f64>()).sqrt())
}

/// Logical cores the host offers.
pub fn available_cores() -> usize {
    num_cpus::get()
}
