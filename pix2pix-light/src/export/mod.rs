//! Export of the trained generator to an ONNX graph for inference elsewhere.
//!
//! The graph is the generator in inference mode: batch norm uses its running
//! statistics and dropout disappears. Parameters are embedded as initializers.

mod proto;

pub use proto::{Attribute, AttributeValue, Encode, Graph, Initializer, Model, Node, ValueInfo};

use crate::model::Pix2PixModel;
use crate::nn::{
    ConvLayer, DeconvLayer, Norm, UnetGenerator, BN_EPS, BN_MOMENTUM, KERNEL_SIZE, LEAKY_SLOPE,
};
use candle::{DType, Device, ModuleT, Result, Tensor};
use std::path::{Path, PathBuf};

pub const OPSET_VERSION: i64 = 10;
pub const PRODUCER_NAME: &str = "pix2pix-light";
pub const INPUT_NAME: &str = "input";
pub const OUTPUT_NAME: &str = "output";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub nodes: usize,
    pub initializers: usize,
    pub output_shape: Vec<usize>,
    pub bytes: usize,
}

struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    fn initializer(&mut self, name: String, t: &Tensor) -> Result<String> {
        let t = t.to_device(&Device::Cpu)?.to_dtype(DType::F32)?;
        self.graph.initializers.push(Initializer {
            name: name.clone(),
            dims: t.dims().iter().map(|&d| d as i64).collect(),
            data: t.flatten_all()?.to_vec1::<f32>()?,
        });
        Ok(name)
    }

    fn node(&mut self, op_type: &str, inputs: Vec<String>, attributes: Vec<Attribute>) -> String {
        let name = format!("{}_{}", op_type, self.graph.nodes.len());
        let output = format!("{name}_out");
        self.graph.nodes.push(Node {
            name,
            op_type: op_type.to_string(),
            inputs,
            outputs: vec![output.clone()],
            attributes,
        });
        output
    }

    fn conv_attrs(stride: usize, padding: usize) -> Vec<Attribute> {
        let (k, s, p) = (KERNEL_SIZE as i64, stride as i64, padding as i64);
        vec![
            Attribute::ints("dilations", &[1, 1]),
            Attribute::int("group", 1),
            Attribute::ints("kernel_shape", &[k, k]),
            Attribute::ints("pads", &[p, p, p, p]),
            Attribute::ints("strides", &[s, s]),
        ]
    }

    fn conv(&mut self, prefix: &str, layer: &ConvLayer, x: String) -> Result<String> {
        let mut inputs = vec![x, self.initializer(format!("{prefix}.weight"), &layer.weight)?];
        if let Some(bias) = &layer.bias {
            inputs.push(self.initializer(format!("{prefix}.bias"), bias)?);
        }
        Ok(self.node("Conv", inputs, Self::conv_attrs(layer.stride, layer.padding)))
    }

    fn deconv(&mut self, prefix: &str, layer: &DeconvLayer, x: String) -> Result<String> {
        let mut inputs = vec![x, self.initializer(format!("{prefix}.weight"), &layer.weight)?];
        if let Some(bias) = &layer.bias {
            inputs.push(self.initializer(format!("{prefix}.bias"), bias)?);
        }
        Ok(self.node("ConvTranspose", inputs, Self::conv_attrs(layer.stride, layer.padding)))
    }

    fn norm(&mut self, prefix: &str, norm: &Norm, x: String) -> Result<String> {
        let inputs = vec![
            x,
            self.initializer(format!("{prefix}.weight"), &norm.weight)?,
            self.initializer(format!("{prefix}.bias"), &norm.bias)?,
            self.initializer(format!("{prefix}.running_mean"), &norm.running_mean)?,
            self.initializer(format!("{prefix}.running_var"), &norm.running_var)?,
        ];
        let attrs = vec![
            Attribute::float("epsilon", BN_EPS as f32),
            Attribute::float("momentum", (1.0 - BN_MOMENTUM) as f32),
        ];
        Ok(self.node("BatchNormalization", inputs, attrs))
    }
}

/// Lower the generator, in inference mode, to an ONNX graph.
pub fn generator_graph(
    generator: &UnetGenerator,
    input_shape: &[usize],
    output_shape: &[usize],
) -> Result<Graph> {
    let mut b = GraphBuilder {
        graph: Graph {
            name: "net_G".to_string(),
            ..Default::default()
        },
    };
    let blocks = generator.blocks();
    let n = blocks.len();

    let mut skips = Vec::with_capacity(n);
    let mut x = INPUT_NAME.to_string();
    for (i, block) in blocks.iter().enumerate() {
        x = b.conv(&format!("down{i}"), &block.down, x)?;
        if let Some(norm) = &block.down_norm {
            x = b.norm(&format!("down_norm{i}"), norm, x)?;
        }
        if i < n - 1 {
            x = b.node(
                "LeakyRelu",
                vec![x],
                vec![Attribute::float("alpha", LEAKY_SLOPE as f32)],
            );
        }
        skips.push(x.clone());
    }

    for (i, block) in blocks.iter().enumerate().rev() {
        if i != n - 1 {
            x = b.node(
                "Concat",
                vec![skips[i].clone(), x],
                vec![Attribute::int("axis", 1)],
            );
        }
        x = b.node("Relu", vec![x], vec![]);
        x = b.deconv(&format!("up{i}"), &block.up, x)?;
        if let Some(norm) = &block.up_norm {
            x = b.norm(&format!("up_norm{i}"), norm, x)?;
        }
        if i == 0 {
            x = b.node("Tanh", vec![x], vec![]);
        }
    }

    let mut graph = b.graph;
    if let Some(last) = graph.nodes.last_mut() {
        last.outputs = vec![OUTPUT_NAME.to_string()];
    }
    let dims = |s: &[usize]| s.iter().map(|&d| d as i64).collect::<Vec<_>>();
    graph.inputs.push(ValueInfo {
        name: INPUT_NAME.to_string(),
        dims: dims(input_shape),
    });
    graph.outputs.push(ValueInfo {
        name: OUTPUT_NAME.to_string(),
        dims: dims(output_shape),
    });
    Ok(graph)
}

/// Write the generator of `model` to `path` as an ONNX model.
///
/// A random input of `input_shape` is pushed through the generator first, so
/// shape problems surface here rather than in the consumer of the file.
pub fn export_generator(
    model: &Pix2PixModel,
    input_shape: &[usize],
    path: impl AsRef<Path>,
) -> Result<ExportSummary> {
    let path = path.as_ref();
    let generator = model.generator();
    let dummy = Tensor::randn(0f32, 1., input_shape, model.device())?;
    let output_shape = generator.forward_t(&dummy, false)?.dims().to_vec();

    let graph = generator_graph(generator, input_shape, &output_shape)?;
    let onnx = Model {
        producer_name: PRODUCER_NAME.to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        opset_version: OPSET_VERSION,
        graph,
    };
    let bytes = onnx.to_bytes();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(candle::Error::wrap)?;
        }
    }
    std::fs::write(path, &bytes).map_err(candle::Error::wrap)?;
    tracing::info!(
        "exported {} nodes to {} ({} bytes)",
        onnx.graph.nodes.len(),
        path.display(),
        bytes.len()
    );
    Ok(ExportSummary {
        path: path.to_path_buf(),
        nodes: onnx.graph.nodes.len(),
        initializers: onnx.graph.initializers.len(),
        output_shape,
        bytes: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::proto::wire::{bytes_of, fields, varints_of};
    use super::*;
    use crate::model::Pix2PixConfig;
    use crate::nn::UnetGeneratorConfig;

    fn tiny_model() -> Result<Pix2PixModel> {
        let config = Pix2PixConfig {
            generator: UnetGeneratorConfig {
                ngf: 2,
                num_downs: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        Pix2PixModel::new(config, &Device::Cpu, false)
    }

    #[test]
    fn graph_mirrors_generator() -> Result<()> {
        let model = tiny_model()?;
        let graph = generator_graph(model.generator(), &[1, 3, 32, 32], &[1, 3, 32, 32])?;
        let count = |op: &str| graph.nodes.iter().filter(|n| n.op_type == op).count();
        assert_eq!(count("Conv"), 5);
        assert_eq!(count("ConvTranspose"), 5);
        assert_eq!(count("LeakyRelu"), 4);
        assert_eq!(count("Relu"), 5);
        assert_eq!(count("Concat"), 4);
        assert_eq!(count("Tanh"), 1);
        // down norms on blocks 1..=3, up norms on blocks 1..=4
        assert_eq!(count("BatchNormalization"), 7);
        assert_eq!(graph.nodes.first().map(|n| n.inputs[0].as_str()), Some(INPUT_NAME));
        assert_eq!(graph.nodes.last().map(|n| n.op_type.as_str()), Some("Tanh"));
        assert_eq!(graph.nodes.last().map(|n| n.outputs[0].as_str()), Some(OUTPUT_NAME));

        // every node input is the graph input, an initializer or an earlier output
        let mut known = vec![INPUT_NAME.to_string()];
        known.extend(graph.initializers.iter().map(|i| i.name.clone()));
        for node in graph.nodes.iter() {
            for input in node.inputs.iter() {
                assert!(known.contains(input), "{} reads undefined {input}", node.name);
            }
            known.extend(node.outputs.iter().cloned());
        }
        Ok(())
    }

    #[test]
    fn exported_file_decodes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let model = tiny_model()?;
        let path = dir.path().join("exported").join("tiny.onnx");
        let summary = export_generator(&model, &[1, 3, 32, 32], &path)?;
        assert_eq!(summary.output_shape, vec![1, 3, 32, 32]);

        let bytes = std::fs::read(&path)?;
        assert_eq!(bytes.len(), summary.bytes);
        let top = fields(&bytes);
        assert_eq!(varints_of(&top, 1), vec![proto::IR_VERSION as u64]);
        assert_eq!(bytes_of(&top, 2), vec![PRODUCER_NAME.as_bytes()]);

        let opset = fields(bytes_of(&top, 8)[0]);
        assert_eq!(varints_of(&opset, 2), vec![OPSET_VERSION as u64]);

        let graph = fields(bytes_of(&top, 7)[0]);
        assert_eq!(bytes_of(&graph, 1).len(), summary.nodes);
        assert_eq!(bytes_of(&graph, 5).len(), summary.initializers);
        assert_eq!(bytes_of(&graph, 11).len(), 1);
        assert_eq!(bytes_of(&graph, 12).len(), 1);

        let first_weight = fields(bytes_of(&graph, 5)[0]);
        assert_eq!(varints_of(&first_weight, 1), vec![2, 3, 4, 4]);
        assert_eq!(bytes_of(&first_weight, 9)[0].len(), 2 * 3 * 4 * 4 * 4);
        Ok(())
    }
}
