//! Minimal DICOM Part-10 writer for tests: preamble, magic, an explicit VR
//! little endian meta group and the patient module.

use std::path::Path;

pub(crate) struct PatientFields<'a> {
    pub name: Option<&'a str>,
    pub id: Option<&'a str>,
    pub birth_date: Option<&'a str>,
    pub sex: Option<&'a str>,
}

impl<'a> PatientFields<'a> {
    pub fn full(name: &'a str, id: &'a str, birth_date: &'a str, sex: &'a str) -> Self {
        Self {
            name: Some(name),
            id: Some(id),
            birth_date: Some(birth_date),
            sex: Some(sex),
        }
    }
}

const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
const SECONDARY_CAPTURE: &str = "1.2.840.10008.5.1.4.1.1.7";

fn push_element(buf: &mut Vec<u8>, group: u16, element: u16, vr: &[u8; 2], value: &[u8]) {
    let mut value = value.to_vec();
    if value.len() % 2 == 1 {
        value.push(if vr == b"UI" || vr == b"OB" { 0 } else { b' ' });
    }
    buf.extend_from_slice(&group.to_le_bytes());
    buf.extend_from_slice(&element.to_le_bytes());
    buf.extend_from_slice(vr);
    if matches!(vr, b"OB" | b"OW" | b"SQ" | b"UN" | b"UT") {
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    } else {
        buf.extend_from_slice(&(value.len() as u16).to_le_bytes());
    }
    buf.extend_from_slice(&value);
}

pub(crate) fn dicom_bytes(fields: &PatientFields<'_>) -> Vec<u8> {
    let mut meta = Vec::new();
    push_element(&mut meta, 0x0002, 0x0001, b"OB", &[0x00, 0x01]);
    push_element(&mut meta, 0x0002, 0x0002, b"UI", SECONDARY_CAPTURE.as_bytes());
    push_element(&mut meta, 0x0002, 0x0003, b"UI", b"1.2.826.0.1.3680043.2.1125.1");
    push_element(&mut meta, 0x0002, 0x0010, b"UI", EXPLICIT_VR_LE.as_bytes());
    push_element(&mut meta, 0x0002, 0x0012, b"UI", b"1.2.826.0.1.3680043.2.1125");

    let mut out = vec![0u8; 128];
    out.extend_from_slice(b"DICM");
    push_element(&mut out, 0x0002, 0x0000, b"UL", &(meta.len() as u32).to_le_bytes());
    out.extend_from_slice(&meta);

    // Dataset elements must be in ascending tag order.
    push_element(&mut out, 0x0008, 0x0016, b"UI", SECONDARY_CAPTURE.as_bytes());
    push_element(&mut out, 0x0008, 0x0018, b"UI", b"1.2.826.0.1.3680043.2.1125.1");
    let patient = [
        (0x0010, b"PN", fields.name),
        (0x0020, b"LO", fields.id),
        (0x0030, b"DA", fields.birth_date),
        (0x0040, b"CS", fields.sex),
    ];
    for (element, vr, value) in patient {
        if let Some(value) = value {
            push_element(&mut out, 0x0010, element, vr, value.as_bytes());
        }
    }
    out
}

/// Same object followed by a pixel data header whose declared length runs far
/// past the end of the file
pub(crate) fn dicom_bytes_with_truncated_pixel_data(fields: &PatientFields<'_>) -> Vec<u8> {
    let mut out = dicom_bytes(fields);
    out.extend_from_slice(&0x7FE0u16.to_le_bytes());
    out.extend_from_slice(&0x0010u16.to_le_bytes());
    out.extend_from_slice(b"OW");
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&(64u32 * 1024 * 1024).to_le_bytes());
    out.extend_from_slice(&[0u8; 16]);
    out
}

pub(crate) fn write_dicom(path: &Path, fields: &PatientFields<'_>) {
    std::fs::write(path, dicom_bytes(fields)).unwrap();
}
