//! SPIR-V reflection.
//!
//! Modules are decoded with `rspirv`; this file only walks the decoded
//! instructions for what the pipeline needs: entry points, the layout of
//! every constant buffer (`Uniform` storage class `Block` variables) and the
//! sizes of ray payloads and hit attributes.
//!
//! All size arithmetic is checked and type nesting is bounded, so a hostile
//! module fails with [`GpuError::Compile`] instead of overflowing.

use hashbrown::{HashMap, HashSet};
use photon_gpu::{GpuError, Result};
use rspirv::dr::{self, Instruction, Operand};
use rspirv::spirv::{self, Decoration, Op, StorageClass};

/// Deepest type nesting followed before a module is rejected.
const MAX_TYPE_DEPTH: u32 = 32;

/// Ray tracing shader stage of an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionModel {
    RayGeneration,
    Intersection,
    AnyHit,
    ClosestHit,
    Miss,
    Callable,
    /// Any non ray tracing model.
    Other(u32),
}

impl From<spirv::ExecutionModel> for ExecutionModel {
    fn from(model: spirv::ExecutionModel) -> Self {
        match model {
            spirv::ExecutionModel::RayGenerationKHR => Self::RayGeneration,
            spirv::ExecutionModel::IntersectionKHR => Self::Intersection,
            spirv::ExecutionModel::AnyHitKHR => Self::AnyHit,
            spirv::ExecutionModel::ClosestHitKHR => Self::ClosestHit,
            spirv::ExecutionModel::MissKHR => Self::Miss,
            spirv::ExecutionModel::CallableKHR => Self::Callable,
            other => Self::Other(other as u32),
        }
    }
}

/// A module entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub model: ExecutionModel,
    pub name: String,
}

/// Byte range of a constant buffer member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantVariable {
    pub offset: u32,
    pub size: u32,
}

/// Reflected layout of one constant buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBufferLayout {
    /// Block name as declared in the shader.
    pub name: String,
    pub variables: HashMap<String, ConstantVariable>,
    /// End of the last member.
    pub size: u32,
}

/// Everything reflected from one module.
#[derive(Debug, Clone, Default)]
pub struct ShaderReflection {
    pub entry_points: Vec<EntryPoint>,
    pub constant_buffers: Vec<ConstantBufferLayout>,
    /// Largest ray payload declared or received.
    pub max_payload_size: u32,
    /// Largest hit attribute block.
    pub max_attribute_size: u32,
}

#[derive(Debug, Clone)]
enum Type {
    Scalar(u32),
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    /// Length is `None` when it is not a plain constant.
    Array { element: u32, length: Option<u32> },
    RuntimeArray { element: u32 },
    Struct(Vec<u32>),
    Pointer { pointee: u32 },
}

/// Declarations gathered from a decoded module, indexed by result id.
#[derive(Default)]
struct Declarations {
    names: HashMap<u32, String>,
    member_names: HashMap<(u32, u32), String>,
    member_offsets: HashMap<(u32, u32), u32>,
    matrix_strides: HashMap<(u32, u32), u32>,
    array_strides: HashMap<u32, u32>,
    blocks: HashSet<u32>,
    types: HashMap<u32, Type>,
    constants: HashMap<u32, u32>,
    /// Pointer type and storage class of every global variable.
    variables: Vec<(u32, StorageClass)>,
}

/// Reflect a SPIR-V module.
pub fn reflect(words: &[u32]) -> Result<ShaderReflection> {
    let module =
        dr::load_words(words).map_err(|e| GpuError::Compile(format!("Malformed SPIR-V: {e:?}")))?;
    let declarations = Declarations::collect(&module)?;

    let mut reflection = ShaderReflection {
        entry_points: module
            .entry_points
            .iter()
            .map(entry_point)
            .collect::<Result<_>>()?,
        ..Default::default()
    };

    for &(pointer_type, storage_class) in &declarations.variables {
        let Type::Pointer { pointee } = *declarations.ty(pointer_type)? else {
            return Err(malformed("variable type is not a pointer"));
        };
        match storage_class {
            StorageClass::Uniform => {
                if let Some(layout) = declarations.constant_buffer(pointee)? {
                    reflection.constant_buffers.push(layout);
                }
            }
            StorageClass::RayPayloadKHR | StorageClass::IncomingRayPayloadKHR => {
                let size = declarations.packed_size(pointee, 0)?;
                reflection.max_payload_size = reflection.max_payload_size.max(size);
            }
            StorageClass::HitAttributeKHR => {
                let size = declarations.packed_size(pointee, 0)?;
                reflection.max_attribute_size = reflection.max_attribute_size.max(size);
            }
            _ => {}
        }
    }

    Ok(reflection)
}

fn malformed(what: &str) -> GpuError {
    GpuError::Compile(format!("Malformed SPIR-V: {what}"))
}

fn checked_mul(a: u32, b: u32) -> Result<u32> {
    a.checked_mul(b)
        .ok_or_else(|| malformed("type size overflows 32 bits"))
}

fn checked_add(a: u32, b: u32) -> Result<u32> {
    a.checked_add(b)
        .ok_or_else(|| malformed("type size overflows 32 bits"))
}

fn entry_point(instruction: &Instruction) -> Result<EntryPoint> {
    let Some(Operand::ExecutionModel(model)) = instruction.operands.first() else {
        return Err(malformed("entry point without an execution model"));
    };
    Ok(EntryPoint {
        model: (*model).into(),
        name: string(instruction, 2)?.to_string(),
    })
}

fn result_id(instruction: &Instruction) -> Result<u32> {
    instruction
        .result_id
        .ok_or_else(|| malformed("declaration without a result id"))
}

fn id(instruction: &Instruction, index: usize) -> Result<u32> {
    match instruction.operands.get(index) {
        Some(Operand::IdRef(id)) => Ok(*id),
        _ => Err(malformed("expected an id operand")),
    }
}

fn literal(instruction: &Instruction, index: usize) -> Result<u32> {
    match instruction.operands.get(index) {
        Some(Operand::LiteralBit32(value)) => Ok(*value),
        _ => Err(malformed("expected a 32-bit literal operand")),
    }
}

fn string(instruction: &Instruction, index: usize) -> Result<&str> {
    match instruction.operands.get(index) {
        Some(Operand::LiteralString(text)) => Ok(text),
        _ => Err(malformed("expected a string operand")),
    }
}

impl Declarations {
    fn collect(module: &dr::Module) -> Result<Self> {
        let mut declarations = Self::default();
        for instruction in &module.debug_names {
            declarations.record_name(instruction)?;
        }
        for instruction in &module.annotations {
            declarations.record_decoration(instruction)?;
        }
        for instruction in &module.types_global_values {
            declarations.record_declaration(instruction)?;
        }
        Ok(declarations)
    }

    fn record_name(&mut self, instruction: &Instruction) -> Result<()> {
        match instruction.class.opcode {
            Op::Name => {
                self.names
                    .insert(id(instruction, 0)?, string(instruction, 1)?.to_string());
            }
            Op::MemberName => {
                self.member_names.insert(
                    (id(instruction, 0)?, literal(instruction, 1)?),
                    string(instruction, 2)?.to_string(),
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn record_decoration(&mut self, instruction: &Instruction) -> Result<()> {
        match instruction.class.opcode {
            Op::Decorate => match instruction.operands.get(1) {
                Some(Operand::Decoration(Decoration::Block)) => {
                    self.blocks.insert(id(instruction, 0)?);
                }
                Some(Operand::Decoration(Decoration::ArrayStride)) => {
                    self.array_strides
                        .insert(id(instruction, 0)?, literal(instruction, 2)?);
                }
                _ => {}
            },
            Op::MemberDecorate => {
                let key = (id(instruction, 0)?, literal(instruction, 1)?);
                match instruction.operands.get(2) {
                    Some(Operand::Decoration(Decoration::Offset)) => {
                        self.member_offsets.insert(key, literal(instruction, 3)?);
                    }
                    Some(Operand::Decoration(Decoration::MatrixStride)) => {
                        self.matrix_strides.insert(key, literal(instruction, 3)?);
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn record_declaration(&mut self, instruction: &Instruction) -> Result<()> {
        let ty = match instruction.class.opcode {
            Op::TypeBool => Type::Scalar(4),
            Op::TypeInt | Op::TypeFloat => Type::Scalar(literal(instruction, 0)? / 8),
            Op::TypeVector => Type::Vector {
                component: id(instruction, 0)?,
                count: literal(instruction, 1)?,
            },
            Op::TypeMatrix => Type::Matrix {
                column: id(instruction, 0)?,
                count: literal(instruction, 1)?,
            },
            Op::TypeArray => Type::Array {
                element: id(instruction, 0)?,
                length: self.constants.get(&id(instruction, 1)?).copied(),
            },
            Op::TypeRuntimeArray => Type::RuntimeArray {
                element: id(instruction, 0)?,
            },
            Op::TypeStruct => Type::Struct(
                (0..instruction.operands.len())
                    .map(|index| id(instruction, index))
                    .collect::<Result<_>>()?,
            ),
            Op::TypePointer => Type::Pointer {
                pointee: id(instruction, 1)?,
            },
            Op::Constant => {
                // 64-bit constants are never array lengths
                if let Some(Operand::LiteralBit32(value)) = instruction.operands.first() {
                    self.constants.insert(result_id(instruction)?, *value);
                }
                return Ok(());
            }
            Op::Variable => {
                let pointer = instruction
                    .result_type
                    .ok_or_else(|| malformed("variable without a type"))?;
                let Some(Operand::StorageClass(storage_class)) = instruction.operands.first()
                else {
                    return Err(malformed("variable without a storage class"));
                };
                self.variables.push((pointer, *storage_class));
                return Ok(());
            }
            _ => return Ok(()),
        };
        self.types.insert(result_id(instruction)?, ty);
        Ok(())
    }

    fn ty(&self, id: u32) -> Result<&Type> {
        self.types
            .get(&id)
            .ok_or_else(|| malformed("reference to an undeclared type"))
    }

    /// Layout of the block behind a `Uniform` variable, looking through arrays.
    fn constant_buffer(&self, mut type_id: u32) -> Result<Option<ConstantBufferLayout>> {
        let mut depth = 0;
        let members = loop {
            depth += 1;
            if depth > MAX_TYPE_DEPTH {
                return Err(malformed("type nesting is too deep"));
            }
            match self.ty(type_id)? {
                Type::Array { element, .. } | Type::RuntimeArray { element } => type_id = *element,
                Type::Struct(members) => break members,
                _ => return Ok(None),
            }
        };
        if !self.blocks.contains(&type_id) {
            return Ok(None);
        }

        let name = self
            .names
            .get(&type_id)
            .cloned()
            .ok_or_else(|| malformed("constant buffer without a name"))?;

        let mut variables = HashMap::new();
        let mut size = 0;
        for (index, &member) in (0u32..).zip(members) {
            let key = (type_id, index);
            let offset = *self
                .member_offsets
                .get(&key)
                .ok_or_else(|| malformed("constant buffer member without an offset"))?;
            let member_size =
                self.explicit_size(member, self.matrix_strides.get(&key).copied(), depth)?;
            size = size.max(checked_add(offset, member_size)?);
            if let Some(member_name) = self.member_names.get(&key) {
                variables.insert(
                    member_name.clone(),
                    ConstantVariable {
                        offset,
                        size: member_size,
                    },
                );
            }
        }

        Ok(Some(ConstantBufferLayout {
            name,
            variables,
            size,
        }))
    }

    /// Size of a type laid out with explicit offsets and strides.
    fn explicit_size(&self, type_id: u32, matrix_stride: Option<u32>, depth: u32) -> Result<u32> {
        if depth > MAX_TYPE_DEPTH {
            return Err(malformed("type nesting is too deep"));
        }
        let depth = depth + 1;
        match self.ty(type_id)? {
            Type::Scalar(bytes) => Ok(*bytes),
            Type::Vector { component, count } => {
                checked_mul(self.explicit_size(*component, None, depth)?, *count)
            }
            Type::Matrix { column, count } => match matrix_stride {
                Some(stride) => checked_mul(stride, *count),
                None => checked_mul(self.explicit_size(*column, None, depth)?, *count),
            },
            Type::Array { element, length } => {
                let length = length.ok_or_else(|| malformed("array length is not a constant"))?;
                let stride = match self.array_strides.get(&type_id) {
                    Some(&stride) => stride,
                    None => self.explicit_size(*element, matrix_stride, depth)?,
                };
                checked_mul(stride, length)
            }
            Type::RuntimeArray { .. } => Ok(0),
            Type::Struct(members) => {
                let mut size = 0;
                for (index, &member) in (0u32..).zip(members) {
                    let key = (type_id, index);
                    let offset = self.member_offsets.get(&key).copied().unwrap_or(size);
                    let member_size =
                        self.explicit_size(member, self.matrix_strides.get(&key).copied(), depth)?;
                    size = size.max(checked_add(offset, member_size)?);
                }
                Ok(size)
            }
            Type::Pointer { .. } => Ok(8),
        }
    }

    /// Size of a type with members packed back to back.
    fn packed_size(&self, type_id: u32, depth: u32) -> Result<u32> {
        if depth > MAX_TYPE_DEPTH {
            return Err(malformed("type nesting is too deep"));
        }
        let depth = depth + 1;
        match self.ty(type_id)? {
            Type::Scalar(bytes) => Ok(*bytes),
            Type::Vector { component, count } => {
                checked_mul(self.packed_size(*component, depth)?, *count)
            }
            Type::Matrix { column, count } => checked_mul(self.packed_size(*column, depth)?, *count),
            Type::Array { element, length } => {
                let length = length.ok_or_else(|| malformed("array length is not a constant"))?;
                checked_mul(self.packed_size(*element, depth)?, length)
            }
            Type::RuntimeArray { .. } => Ok(0),
            Type::Struct(members) => members.iter().try_fold(0, |size, &member| {
                checked_add(size, self.packed_size(member, depth)?)
            }),
            Type::Pointer { .. } => Ok(8),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const MAGIC: u32 = 0x0723_0203;

    /// Tiny assembler for hand-written test modules.
    pub(crate) struct Assembler {
        words: Vec<u32>,
    }

    impl Assembler {
        pub(crate) fn new() -> Self {
            Self {
                words: vec![MAGIC, 0x0001_0600, 0, 100, 0],
            }
        }

        pub(crate) fn op(&mut self, opcode: Op, operands: &[u32]) -> &mut Self {
            self.words
                .push(((operands.len() as u32 + 1) << 16) | opcode as u32);
            self.words.extend_from_slice(operands);
            self
        }

        pub(crate) fn string(text: &str) -> Vec<u32> {
            let mut bytes = text.as_bytes().to_vec();
            bytes.push(0);
            while bytes.len() % 4 != 0 {
                bytes.push(0);
            }
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }

        pub(crate) fn op_with_string(&mut self, opcode: Op, before: &[u32], text: &str) -> &mut Self {
            let mut operands = before.to_vec();
            operands.extend(Self::string(text));
            self.op(opcode, &operands)
        }

        pub(crate) fn finish(&self) -> Vec<u32> {
            self.words.clone()
        }
    }

    const BLOCK: u32 = Decoration::Block as u32;
    const OFFSET: u32 = Decoration::Offset as u32;
    const MATRIX_STRIDE: u32 = Decoration::MatrixStride as u32;
    const UNIFORM: u32 = StorageClass::Uniform as u32;
    const RAY_PAYLOAD: u32 = StorageClass::RayPayloadKHR as u32;

    /// A ray tracing module with the path tracer's constant buffer and payload.
    pub(crate) fn path_tracer_like(model: u32, entry: &str, block: &str) -> Vec<u32> {
        const FLOAT: u32 = 1;
        const UINT: u32 = 2;
        const VEC3: u32 = 3;
        const VEC4: u32 = 4;
        const MAT4: u32 = 5;
        const CBUFFER: u32 = 6;
        const CBUFFER_ARRAY: u32 = 7;
        const CBUFFER_PTR: u32 = 8;
        const CBUFFER_VAR: u32 = 9;
        const PAYLOAD: u32 = 10;
        const PAYLOAD_PTR: u32 = 11;
        const PAYLOAD_VAR: u32 = 12;
        const MAIN: u32 = 13;

        let mut asm = Assembler::new();
        asm.op_with_string(Op::EntryPoint, &[model, MAIN], entry)
            .op_with_string(Op::Name, &[CBUFFER], block)
            .op_with_string(Op::MemberName, &[CBUFFER, 0], "inverseView")
            .op_with_string(Op::MemberName, &[CBUFFER, 1], "inverseProjection")
            .op_with_string(Op::MemberName, &[CBUFFER, 2], "nLights")
            .op_with_string(Op::MemberName, &[CBUFFER, 3], "useEnvironmentMap")
            .op_with_string(Op::MemberName, &[CBUFFER, 4], "SPP")
            .op(Op::Decorate, &[CBUFFER, BLOCK])
            .op(Op::MemberDecorate, &[CBUFFER, 0, OFFSET, 0])
            .op(Op::MemberDecorate, &[CBUFFER, 0, MATRIX_STRIDE, 16])
            .op(Op::MemberDecorate, &[CBUFFER, 1, OFFSET, 64])
            .op(Op::MemberDecorate, &[CBUFFER, 1, MATRIX_STRIDE, 16])
            .op(Op::MemberDecorate, &[CBUFFER, 2, OFFSET, 128])
            .op(Op::MemberDecorate, &[CBUFFER, 3, OFFSET, 132])
            .op(Op::MemberDecorate, &[CBUFFER, 4, OFFSET, 136])
            .op(Op::TypeFloat, &[FLOAT, 32])
            .op(Op::TypeInt, &[UINT, 32, 0])
            .op(Op::TypeVector, &[VEC3, FLOAT, 3])
            .op(Op::TypeVector, &[VEC4, FLOAT, 4])
            .op(Op::TypeMatrix, &[MAT4, VEC4, 4])
            .op(Op::TypeStruct, &[CBUFFER, MAT4, MAT4, UINT, UINT, FLOAT])
            .op(Op::TypeRuntimeArray, &[CBUFFER_ARRAY, CBUFFER])
            .op(Op::TypePointer, &[CBUFFER_PTR, UNIFORM, CBUFFER_ARRAY])
            .op(Op::Variable, &[CBUFFER_PTR, CBUFFER_VAR, UNIFORM])
            .op(Op::TypeStruct, &[PAYLOAD, VEC3, VEC3, UINT, UINT, UINT])
            .op(Op::TypePointer, &[PAYLOAD_PTR, RAY_PAYLOAD, PAYLOAD])
            .op(Op::Variable, &[PAYLOAD_PTR, PAYLOAD_VAR, RAY_PAYLOAD]);
        asm.finish()
    }

    #[test]
    fn reflects_constant_buffer_layout() {
        let module = path_tracer_like(spirv::ExecutionModel::RayGenerationKHR as u32, "main", "CBuffer");
        let reflection = reflect(&module).unwrap();

        assert_eq!(
            reflection.entry_points,
            vec![EntryPoint {
                model: ExecutionModel::RayGeneration,
                name: "main".to_string()
            }]
        );
        assert_eq!(reflection.constant_buffers.len(), 1);
        let cbuffer = &reflection.constant_buffers[0];
        assert_eq!(cbuffer.name, "CBuffer");
        assert_eq!(cbuffer.size, 140);
        assert_eq!(
            cbuffer.variables["inverseView"],
            ConstantVariable { offset: 0, size: 64 }
        );
        assert_eq!(
            cbuffer.variables["inverseProjection"],
            ConstantVariable {
                offset: 64,
                size: 64
            }
        );
        assert_eq!(
            cbuffer.variables["nLights"],
            ConstantVariable {
                offset: 128,
                size: 4
            }
        );
        assert_eq!(
            cbuffer.variables["SPP"],
            ConstantVariable {
                offset: 136,
                size: 4
            }
        );
    }

    #[test]
    fn reflects_payload_size() {
        let module = path_tracer_like(spirv::ExecutionModel::MissKHR as u32, "main", "CBuffer");
        let reflection = reflect(&module).unwrap();
        assert_eq!(reflection.entry_points[0].model, ExecutionModel::Miss);
        assert_eq!(reflection.max_payload_size, 36);
        assert_eq!(reflection.max_attribute_size, 0);
    }

    #[test]
    fn rejects_malformed_modules() {
        assert!(matches!(reflect(&[]), Err(GpuError::Compile(_))));
        assert!(reflect(&[0xdead_beef, 0, 0, 0, 0]).is_err());

        let mut truncated = path_tracer_like(spirv::ExecutionModel::RayGenerationKHR as u32, "main", "CBuffer");
        truncated.pop();
        assert!(reflect(&truncated).is_err());
    }

    #[test]
    fn oversized_payload_array_is_a_compile_error() {
        const FLOAT: u32 = 1;
        const UINT: u32 = 2;
        const LENGTH: u32 = 3;
        const ARRAY: u32 = 4;
        const PAYLOAD_PTR: u32 = 5;
        const PAYLOAD_VAR: u32 = 6;

        let module = Assembler::new()
            .op(Op::TypeFloat, &[FLOAT, 32])
            .op(Op::TypeInt, &[UINT, 32, 0])
            .op(Op::Constant, &[UINT, LENGTH, u32::MAX])
            .op(Op::TypeArray, &[ARRAY, FLOAT, LENGTH])
            .op(Op::TypePointer, &[PAYLOAD_PTR, RAY_PAYLOAD, ARRAY])
            .op(Op::Variable, &[PAYLOAD_PTR, PAYLOAD_VAR, RAY_PAYLOAD])
            .finish();

        assert!(matches!(reflect(&module), Err(GpuError::Compile(_))));
    }

    #[test]
    fn self_referential_struct_is_a_compile_error() {
        const FLOAT: u32 = 1;
        const NODE: u32 = 2;
        const PAYLOAD_PTR: u32 = 3;
        const PAYLOAD_VAR: u32 = 4;

        let module = Assembler::new()
            .op(Op::TypeFloat, &[FLOAT, 32])
            .op(Op::TypeStruct, &[NODE, FLOAT, NODE])
            .op(Op::TypePointer, &[PAYLOAD_PTR, RAY_PAYLOAD, NODE])
            .op(Op::Variable, &[PAYLOAD_PTR, PAYLOAD_VAR, RAY_PAYLOAD])
            .finish();

        assert!(matches!(reflect(&module), Err(GpuError::Compile(_))));
    }

    #[test]
    fn member_offset_past_u32_is_a_compile_error() {
        const FLOAT: u32 = 1;
        const VEC4: u32 = 2;
        const BUFFER: u32 = 3;
        const BUFFER_PTR: u32 = 4;
        const BUFFER_VAR: u32 = 5;

        let module = Assembler::new()
            .op_with_string(Op::Name, &[BUFFER], "Far")
            .op(Op::Decorate, &[BUFFER, BLOCK])
            .op(Op::MemberDecorate, &[BUFFER, 0, OFFSET, u32::MAX - 8])
            .op(Op::TypeFloat, &[FLOAT, 32])
            .op(Op::TypeVector, &[VEC4, FLOAT, 4])
            .op(Op::TypeStruct, &[BUFFER, VEC4])
            .op(Op::TypePointer, &[BUFFER_PTR, UNIFORM, BUFFER])
            .op(Op::Variable, &[BUFFER_PTR, BUFFER_VAR, UNIFORM])
            .finish();

        assert!(matches!(reflect(&module), Err(GpuError::Compile(_))));
    }
}
