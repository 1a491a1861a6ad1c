use weir::{Encoding, TextDecoder};

#[test]
fn utf8_held_across_chunks() {
    crate::init();

    let euro = "€".as_bytes();
    let mut dec = TextDecoder::new(Encoding::Utf8);
    assert_eq!(dec.encoding(), Encoding::Utf8);

    assert!(dec.decode(&euro[..2]).is_empty());
    assert_eq!(dec.decode(&euro[2..]), euro.to_vec());
    assert!(dec.flush().is_empty());
}

#[test]
fn utf8_invalid_replaced() {
    crate::init();

    let mut dec = TextDecoder::new(Encoding::Utf8);
    assert_eq!(dec.decode(b"a\xffb"), "a\u{FFFD}b".as_bytes().to_vec());

    println!("Truncated sequence at end of input");
    assert!(dec.decode(&[0xE2, 0x82]).is_empty());
    assert_eq!(dec.flush(), "\u{FFFD}".as_bytes().to_vec());
}

#[test]
fn latin1() {
    crate::init();

    let mut dec = TextDecoder::new(Encoding::Latin1);
    assert_eq!(dec.decode(&[b'c', b'a', b'f', 0xE9]), "café".as_bytes().to_vec());
    assert!(dec.flush().is_empty());
}
