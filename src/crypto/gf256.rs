//! Arithmetic in GF(2⁸) with the AES reduction polynomial x⁸+x⁴+x³+x+1.
//!
//! No lookup tables: multiplication is a fixed-iteration shift-and-xor loop
//! and inversion is exponentiation by 254, so the running time does not
//! depend on the operand values.

/// Multiply two field elements.
pub fn mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    for _ in 0..8 {
        // branch-free select of `a` when the low bit of b is set
        product ^= a & (b & 1).wrapping_neg();
        let carry = (a >> 7) & 1;
        a = (a << 1) ^ (0x1b & carry.wrapping_neg());
        b >>= 1;
    }
    product
}

/// Multiplicative inverse via a^254. `inv(0)` is 0 by convention; callers
/// must never divide by zero.
pub fn inv(a: u8) -> u8 {
    // square-and-multiply over the fixed exponent 254 = 0b11111110
    let mut result = 1u8;
    let mut power = a;
    for bit in 0..8 {
        if (254 >> bit) & 1 == 1 {
            result = mul(result, power);
        }
        power = mul(power, power);
    }
    result
}

/// Evaluate the Lagrange interpolation polynomial through `points` at x = 0.
///
/// The x-coordinates must be pairwise distinct and nonzero. In GF(2⁸)
/// subtraction is xor, so the basis term for point j is
/// `prod(x_m / (x_j ^ x_m))` over all other points m.
pub fn interpolate_at_zero(points: &[(u8, u8)]) -> u8 {
    let mut secret = 0u8;
    for (j, &(xj, yj)) in points.iter().enumerate() {
        let mut basis = 1u8;
        for (m, &(xm, _)) in points.iter().enumerate() {
            if m == j {
                continue;
            }
            basis = mul(basis, mul(xm, inv(xj ^ xm)));
        }
        secret ^= mul(yj, basis);
    }
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_identity_and_zero() {
        for a in 0..=255u8 {
            assert_eq!(mul(a, 1), a);
            assert_eq!(mul(a, 0), 0);
        }
    }

    #[test]
    fn mul_is_commutative() {
        for a in (0..=255u8).step_by(7) {
            for b in (0..=255u8).step_by(11) {
                assert_eq!(mul(a, b), mul(b, a));
            }
        }
    }

    #[test]
    fn mul_known_values() {
        // 0x53 * 0xca = 1 is the classic AES field example
        assert_eq!(mul(0x53, 0xca), 0x01);
        assert_eq!(mul(0x02, 0x80), 0x1b);
        assert_eq!(mul(0x57, 0x83), 0xc1);
    }

    #[test]
    fn inv_roundtrip() {
        for a in 1..=255u8 {
            assert_eq!(mul(a, inv(a)), 1, "inverse failed for {a:#04x}");
        }
    }

    #[test]
    fn interpolation_recovers_constant_term() {
        // p(x) = 0x42 + 0x17*x + 0x99*x^2, evaluated at x = 1..=5
        let eval = |x: u8| 0x42 ^ mul(0x17, x) ^ mul(0x99, mul(x, x));
        let points: Vec<(u8, u8)> = (1..=5).map(|x| (x, eval(x))).collect();

        // any 3 points determine the degree-2 polynomial
        assert_eq!(interpolate_at_zero(&points[..3]), 0x42);
        assert_eq!(interpolate_at_zero(&points[1..4]), 0x42);
        assert_eq!(interpolate_at_zero(&points[2..]), 0x42);
        // extra consistent points do not disturb the result
        assert_eq!(interpolate_at_zero(&points), 0x42);
    }
}
