use bitstream::{bit_ranges_equal, BitError, BitReader, BitWriter};

#[test]
fn bounded_writer_roundtrip_bits() {
    let mut buf = [0u8; 8];
    let mut writer = BitWriter::new(&mut buf);
    writer.write_bits(0b1010, 4).unwrap();
    writer.write_bits(0xAB, 8).unwrap();
    let bytes_used = writer.finish();

    let mut reader = BitReader::new(&buf[..bytes_used]);
    assert_eq!(reader.read_bits(4).unwrap(), 0b1010);
    assert_eq!(reader.read_bits(8).unwrap(), 0xAB);
}

#[test]
fn overwrite_middle_field_keeps_neighbours() {
    let mut buf = [0u8; 8];
    let mut writer = BitWriter::new(&mut buf);
    writer.write_bits(0x5, 3).unwrap();
    writer.write_bits(0x1FF, 9).unwrap();
    writer.write_bits(0x2, 2).unwrap();
    let original = buf;

    let mut writer = BitWriter::with_existing(&mut buf, 14).unwrap();
    writer.seek(3).unwrap();
    writer.write_bits(0x0AA, 9).unwrap();
    assert_eq!(writer.bits_written(), 14);
    let used = writer.finish();

    assert!(bit_ranges_equal(&original, 0, &buf, 0, 3));
    assert!(!bit_ranges_equal(&original, 3, &buf, 3, 9));
    assert!(bit_ranges_equal(&original, 12, &buf, 12, 2));

    let mut reader = BitReader::new(&buf[..used]);
    assert_eq!(reader.read_bits(3).unwrap(), 0x5);
    assert_eq!(reader.read_bits(9).unwrap(), 0x0AA);
    assert_eq!(reader.read_bits(2).unwrap(), 0x2);
}

#[test]
fn varint_overflowing_buffer_is_error() {
    let mut buf = [0u8; 2];
    let mut writer = BitWriter::new(&mut buf);
    let err = writer.write_varu64(u64::MAX).unwrap_err();
    assert!(matches!(err, BitError::BufferOverflow { capacity: 16, .. }));
}
