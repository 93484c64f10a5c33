/// Compute the ACPI checksum over the given slice of ACPI data.
///
/// The checksum is calculated by adding all bytes (wrapping around on overflow).
/// The result must be zero for the checksum to be valid.
pub fn acpi_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0_u8, |acc, b| acc.wrapping_add(*b))
}

/// Store the byte at `index` so that `data` sums to zero.
#[cfg(test)]
pub(crate) fn fix_checksum(data: &mut [u8], index: usize) {
    data[index] = 0;
    data[index] = 0u8.wrapping_sub(acpi_checksum(data));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_wraps() {
        assert_eq!(acpi_checksum(&[0xFF, 0x01]), 0);
        assert_eq!(acpi_checksum(&[0x80, 0x80, 0x05]), 5);
        assert_eq!(acpi_checksum(&[]), 0);
    }

    #[test]
    fn fixed_checksum_sums_to_zero() {
        let mut data = [1u8, 2, 3, 0, 250];
        fix_checksum(&mut data, 3);
        assert_eq!(acpi_checksum(&data), 0);
    }
}
