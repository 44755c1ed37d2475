use bytes::Bytes;
use pretty_assertions::assert_eq;
use spatial_codec::{
    decode_marker_list, decode_world_map, encode_marker_list, encode_world_map, CodecError,
    MarkerListDecoder,
};
use spatial_model::{AnchorRecord, Marker, Rgba, Transform, WorldMap};

fn markers(count: usize) -> Vec<Marker> {
    (0..count)
        .map(|i| {
            Marker::new(
                Transform::from_translation(i as f32 * 0.1, 0.5, -1.0),
                0.03,
                Rgba::from_palette(i),
            )
            .unwrap()
        })
        .collect()
}

#[test]
fn every_truncated_marker_list_is_rejected() {
    let blob = encode_marker_list(&markers(3));
    for len in 0..blob.len() {
        let result = decode_marker_list(blob.slice(..len));
        assert!(result.is_err(), "prefix of {len} bytes decoded");
    }
    let (decoded, report) = decode_marker_list(blob).unwrap();
    assert_eq!(decoded.len(), 3);
    assert!(report.is_clean());
}

#[test]
fn every_truncated_world_map_is_rejected() {
    let list = markers(2);
    let map = WorldMap {
        features: vec![7; 32],
        anchors: list.into_iter().map(AnchorRecord::Marker).collect(),
    };
    let blob = encode_world_map(&map);
    for len in 0..blob.len() {
        assert!(
            decode_world_map(blob.slice(..len)).is_err(),
            "prefix of {len} bytes decoded"
        );
    }
    assert_eq!(decode_world_map(blob).unwrap(), map);
}

#[test]
fn header_corruption_is_reported_precisely() {
    let blob = encode_marker_list(&markers(1)).to_vec();

    let mut bad_magic = blob.clone();
    bad_magic[0] = b'X';
    assert_eq!(
        decode_marker_list(Bytes::from(bad_magic)).unwrap_err(),
        CodecError::BadMagic
    );

    let mut future = blob.clone();
    future[4..6].copy_from_slice(&9u16.to_le_bytes());
    assert_eq!(
        decode_marker_list(Bytes::from(future)).unwrap_err(),
        CodecError::UnsupportedVersion(9)
    );

    assert!(matches!(
        decode_world_map(Bytes::from(blob)),
        Err(CodecError::WrongKind { .. })
    ));
}

#[test]
fn batched_decoding_matches_one_shot_decoding() {
    let blob = encode_marker_list(&markers(7));
    let mut decoder = MarkerListDecoder::new(blob.clone()).unwrap();
    assert_eq!(decoder.total(), 7);

    let mut sizes = Vec::new();
    while !decoder.is_finished() {
        sizes.push(decoder.next_batch(3).unwrap().len());
    }
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(decoder.consumed(), 7);

    let (one_shot, _) = decode_marker_list(blob).unwrap();
    assert_eq!(one_shot.len(), 7);
}
