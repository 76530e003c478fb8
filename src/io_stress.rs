/// Keep the I/O queues busy by flushing every filesystem, forever.
pub fn stress_io() -> ! {
    loop {
        flush();
    }
}

fn flush() {
    // SAFETY: sync(2) takes no arguments and cannot fail.
    unsafe { libc::sync() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_returns() {
        flush();
    }
}
