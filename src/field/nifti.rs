//! NIfTI-1 single-file (`.nii`) reader and writer for cubic grids.
//!
//! Only what the pipeline needs: 3D volumes, float32 or int32 voxels,
//! little-endian, with an sform affine mapping voxel indices onto the
//! normalised `[-1, 1]` cube.

use std::io::{Read, Write};
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use super::{grid_index, FieldError, LabelVolume, VolumetricField};

const HEADER_SIZE: i32 = 348;
/// Header plus the 4-byte extension flag.
const VOX_OFFSET: usize = 352;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const MAGIC: [u8; 4] = *b"n+1\0";

/// Errors from reading or writing NIfTI files.
#[derive(Error, Debug)]
pub enum NiftiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a NIfTI-1 file: {0}")]
    InvalidHeader(String),

    #[error("big-endian NIfTI files are not supported")]
    UnsupportedEndianness,

    #[error("unsupported NIfTI datatype code {0}")]
    UnsupportedDatatype(i16),

    #[error("expected a cubic 3D volume, got dimensions {0:?}")]
    NonCubic([i16; 8]),

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// The 348-byte NIfTI-1 header, laid out exactly as on disk.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Nifti1Header {
    sizeof_hdr: i32,
    data_type: [u8; 10],
    db_name: [u8; 18],
    extents: i32,
    session_error: i16,
    regular: u8,
    dim_info: u8,
    dim: [i16; 8],
    intent_p1: f32,
    intent_p2: f32,
    intent_p3: f32,
    intent_code: i16,
    datatype: i16,
    bitpix: i16,
    slice_start: i16,
    pixdim: [f32; 8],
    vox_offset: f32,
    scl_slope: f32,
    scl_inter: f32,
    slice_end: i16,
    slice_code: u8,
    xyzt_units: u8,
    cal_max: f32,
    cal_min: f32,
    slice_duration: f32,
    toffset: f32,
    glmax: i32,
    glmin: i32,
    descrip: [u8; 80],
    aux_file: [u8; 24],
    qform_code: i16,
    sform_code: i16,
    quatern_b: f32,
    quatern_c: f32,
    quatern_d: f32,
    qoffset_x: f32,
    qoffset_y: f32,
    qoffset_z: f32,
    srow_x: [f32; 4],
    srow_y: [f32; 4],
    srow_z: [f32; 4],
    intent_name: [u8; 16],
    magic: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<Nifti1Header>() == HEADER_SIZE as usize);

impl Nifti1Header {
    fn cube(resolution: usize, datatype: i16) -> Self {
        let mut header = Self::zeroed();
        let r = resolution as i16;
        let spacing = 2.0 / resolution as f32;

        header.sizeof_hdr = HEADER_SIZE;
        header.regular = b'r';
        header.dim = [3, r, r, r, 1, 1, 1, 1];
        header.datatype = datatype;
        header.bitpix = 32;
        header.pixdim = [1.0, spacing, spacing, spacing, 1.0, 1.0, 1.0, 1.0];
        header.vox_offset = VOX_OFFSET as f32;
        header.scl_slope = 1.0;
        // Units: millimetre placeholder, matches what nibabel writes by default.
        header.xyzt_units = 2;
        header.sform_code = 2;
        header.srow_x = [spacing, 0.0, 0.0, -1.0];
        header.srow_y = [0.0, spacing, 0.0, -1.0];
        header.srow_z = [0.0, 0.0, spacing, -1.0];
        let descrip = b"deepfracture";
        header.descrip[..descrip.len()].copy_from_slice(descrip);
        header.magic = MAGIC;
        header
    }

    fn resolution(&self) -> Result<usize, NiftiError> {
        let dim = self.dim;
        let cubic = dim[0] >= 3
            && dim[1] > 0
            && dim[1] == dim[2]
            && dim[2] == dim[3]
            && dim[4..=dim[0].clamp(3, 7) as usize].iter().all(|&d| d <= 1);
        if !cubic {
            return Err(NiftiError::NonCubic(dim));
        }
        Ok(dim[1] as usize)
    }
}

/// Write a float32 volume.
pub fn write_field(path: impl AsRef<Path>, field: &VolumetricField) -> Result<(), NiftiError> {
    let r = field.resolution();
    write_volume(path.as_ref(), r, DT_FLOAT32, |x, y, z| {
        field.data()[grid_index(r, x, y, z)].to_le_bytes()
    })
}

/// Write an int32 label volume.
pub fn write_labels(path: impl AsRef<Path>, labels: &LabelVolume) -> Result<(), NiftiError> {
    let r = labels.resolution();
    write_volume(path.as_ref(), r, DT_INT32, |x, y, z| {
        labels.labels()[grid_index(r, x, y, z)].to_le_bytes()
    })
}

/// Read a volume as floats. Int32 volumes are converted.
pub fn read_field(path: impl AsRef<Path>) -> Result<VolumetricField, NiftiError> {
    let (r, datatype, bytes) = read_volume(path.as_ref())?;
    let mut data = vec![0.0f32; r * r * r];
    for_each_voxel(r, &bytes, |idx, raw| {
        data[idx] = match datatype {
            DT_FLOAT32 => f32::from_le_bytes(raw),
            _ => i32::from_le_bytes(raw) as f32,
        };
    });
    Ok(VolumetricField::from_data(r, data)?)
}

/// Read a volume as integer labels. Float32 volumes are rounded.
pub fn read_labels(path: impl AsRef<Path>) -> Result<LabelVolume, NiftiError> {
    let (r, datatype, bytes) = read_volume(path.as_ref())?;
    let mut labels = vec![0i32; r * r * r];
    for_each_voxel(r, &bytes, |idx, raw| {
        labels[idx] = match datatype {
            DT_INT32 => i32::from_le_bytes(raw),
            _ => f32::from_le_bytes(raw).round() as i32,
        };
    });
    Ok(LabelVolume::from_data(r, labels)?)
}

fn write_volume(
    path: &Path,
    resolution: usize,
    datatype: i16,
    voxel: impl Fn(usize, usize, usize) -> [u8; 4],
) -> Result<(), NiftiError> {
    let header = Nifti1Header::cube(resolution, datatype);
    let file = std::fs::File::create(path)?;
    let mut w = std::io::BufWriter::new(file);

    w.write_all(bytemuck::bytes_of(&header))?;
    w.write_all(&[0u8; 4])?;

    // NIfTI stores the first dimension fastest.
    for z in 0..resolution {
        for y in 0..resolution {
            for x in 0..resolution {
                w.write_all(&voxel(x, y, z))?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

fn read_volume(path: &Path) -> Result<(usize, i16, Vec<u8>), NiftiError> {
    let mut file = std::fs::File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    if bytes.len() < HEADER_SIZE as usize {
        return Err(NiftiError::InvalidHeader(format!(
            "file is {} bytes, shorter than a header",
            bytes.len()
        )));
    }
    let header: Nifti1Header = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE as usize]);

    if header.sizeof_hdr != HEADER_SIZE {
        if header.sizeof_hdr.swap_bytes() == HEADER_SIZE {
            return Err(NiftiError::UnsupportedEndianness);
        }
        return Err(NiftiError::InvalidHeader(format!(
            "sizeof_hdr is {}",
            header.sizeof_hdr
        )));
    }
    if header.magic != MAGIC {
        return Err(NiftiError::InvalidHeader(
            "missing n+1 magic (two-file .hdr/.img pairs are not supported)".into(),
        ));
    }
    if header.datatype != DT_FLOAT32 && header.datatype != DT_INT32 {
        return Err(NiftiError::UnsupportedDatatype(header.datatype));
    }

    let r = header.resolution()?;
    let offset = (header.vox_offset as usize).max(VOX_OFFSET);
    let needed = offset + r * r * r * 4;
    if bytes.len() < needed {
        return Err(NiftiError::InvalidHeader(format!(
            "voxel data truncated: need {} bytes, file has {}",
            needed,
            bytes.len()
        )));
    }
    let data = bytes[offset..needed].to_vec();
    Ok((r, header.datatype, data))
}

fn for_each_voxel(resolution: usize, bytes: &[u8], mut f: impl FnMut(usize, [u8; 4])) {
    let mut chunks = bytes.chunks_exact(4);
    for z in 0..resolution {
        for y in 0..resolution {
            for x in 0..resolution {
                if let Some(chunk) = chunks.next() {
                    let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
                    f(grid_index(resolution, x, y, z), raw);
                }
            }
        }
    }
}
