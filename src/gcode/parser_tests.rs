//! Tests for the word-level G-code tokenizer.

use super::parser::parse_line;
use super::{GcodeBlock, GcodeError};

#[test]
fn parses_motion_words() {
    let block = parse_line("G01 X10.5 Y-20 F150").unwrap();
    assert_eq!(block.g, Some(1));
    assert_eq!(block.x, Some(10.5));
    assert_eq!(block.y, Some(-20.0));
    assert_eq!(block.f, Some(150.0));
    assert_eq!(block.m, None);
}

#[test]
fn parses_arc_words() {
    let block = parse_line("G02 X0 Y10 I-10 J0 F300").unwrap();
    assert_eq!(block.g, Some(2));
    assert_eq!(block.i, Some(-10.0));
    assert_eq!(block.j, Some(0.0));
    assert_eq!(block.r, None);
}

#[test]
fn parses_spindle_and_dwell_words() {
    let block = parse_line("M03 S1500").unwrap();
    assert_eq!(block.m, Some(3));
    assert_eq!(block.s, Some(1500.0));

    let block = parse_line("G04 P0.5").unwrap();
    assert_eq!(block.g, Some(4));
    assert_eq!(block.p, Some(0.5));
}

#[test]
fn empty_line_yields_empty_block() {
    let block = parse_line("").unwrap();
    assert!(block.is_empty());
    let block = parse_line("   ").unwrap();
    assert!(block.is_empty());
}

#[test]
fn whitespace_between_letter_and_number_is_tolerated() {
    let block = parse_line("G 1 X 5.0").unwrap();
    assert_eq!(block.g, Some(1));
    assert_eq!(block.x, Some(5.0));
}

#[test]
fn signed_and_fractional_floats() {
    let block = parse_line("X+1.5 Y-.25 I2. J0").unwrap();
    assert_eq!(block.x, Some(1.5));
    assert_eq!(block.y, Some(-0.25));
    assert_eq!(block.i, Some(2.0));
    assert_eq!(block.j, Some(0.0));
}

#[test]
fn unknown_letters_are_skipped() {
    let block = parse_line("N100 G01 X5 Q99").unwrap();
    assert_eq!(block.g, Some(1));
    assert_eq!(block.x, Some(5.0));
}

#[test]
fn malformed_numbers_are_invalid() {
    assert_eq!(
        parse_line("G01 X"),
        Err(GcodeError::InvalidParam("X value"))
    );
    assert_eq!(
        parse_line("Gabc"),
        Err(GcodeError::InvalidParam("G number"))
    );
    assert_eq!(
        parse_line("X.."),
        Err(GcodeError::InvalidParam("X value"))
    );
    assert_eq!(parse_line("F-"), Err(GcodeError::InvalidParam("F value")));
}

#[test]
fn lowercase_letters_still_parse() {
    // The framer normally uppercases, but the tokenizer does not rely on it.
    let block = parse_line("g01 x5").unwrap();
    assert_eq!(block.g, Some(1));
    assert_eq!(block.x, Some(5.0));
}

#[test]
fn last_occurrence_of_a_word_wins() {
    let block = parse_line("X1 X2").unwrap();
    assert_eq!(block.x, Some(2.0));
}

#[test]
fn default_block_is_empty() {
    assert!(GcodeBlock::default().is_empty());
}
