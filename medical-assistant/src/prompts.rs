use crate::models::{Modality, PatientContext};

pub const PRESCRIPTION_SYSTEM_ROLE: &str = "你是一名资深中医专家";
pub const IMAGING_SYSTEM_ROLE: &str = "你是一名资深医学影像科专家";

/// Target shape for prescriptions. Keys mirror [`crate::models::Prescription`].
pub const PRESCRIPTION_SCHEMA: &str = r#"{
    "syndrome_type": {
        "main_syndrome": "",
        "secondary_syndrome": "",
        "analysis": ""
    },
    "treatment_method": {
        "main_method": "",
        "auxiliary_method": "",
        "explanation": ""
    },
    "main_prescription": {
        "name": "",
        "source": "",
        "modification": ""
    },
    "composition": [
        {"herb": "", "dosage": "", "role": "", "function": "", "preparation": ""}
    ],
    "usage": {
        "preparation_method": "",
        "administration": "",
        "course": ""
    },
    "contraindications": {
        "pregnancy": "",
        "diet": "",
        "lifestyle": "",
        "warnings": ""
    }
}"#;

/// Target shape for image reports. Keys mirror [`crate::models::ImagingReport`];
/// `detected_modality` is overwritten with the classifier's label after the
/// model call.
pub const IMAGING_SCHEMA: &str = r#"{
    "detected_modality": "xray | ct | mri | ultrasound | petct",
    "findings": {
        "primary_findings": "",
        "secondary_findings": "",
        "image_quality": ""
    },
    "diagnosis": {
        "primary_diagnosis": "",
        "differential_diagnosis": "",
        "reasoning": ""
    },
    "recommendations": {
        "follow_up": "",
        "further_examination": "",
        "treatment": ""
    },
    "severity": "unknown | mild | moderate | severe | critical",
    "confidence": 0.0
}"#;

/// "患者信息: 年龄45岁，性别女，过敏史: 青霉素"
pub fn patient_sentence(patient: &PatientContext) -> String {
    let age = patient
        .age
        .map(|a| a.to_string())
        .unwrap_or_else(|| "未知".to_string());
    let gender = patient.gender.as_deref().unwrap_or("未知");
    let allergies = if patient.allergies.is_empty() {
        "无".to_string()
    } else {
        patient.allergies.join(",")
    };
    format!("患者信息: 年龄{age}岁，性别{gender}，过敏史: {allergies}")
}

pub fn prescription_prompt(symptoms: &str, patient: Option<&PatientContext>) -> String {
    let patient_line = patient
        .map(|p| format!("{}\n", patient_sentence(p)))
        .unwrap_or_default();

    format!(
        r#"你是一名有30年临床经验的中医主任医师，请根据以下信息开具中药处方：

{patient_line}主要症状: {symptoms}

请严格按照以下步骤思考：
1. 中医辨证分型（如"风寒表证"）
2. 确定治法（如"辛温解表"）
3. 选择主方（经典方剂名称）
4. 详细组成（药材及精确剂量）
5. 煎服方法
6. 特别注意事项和禁忌

要求：
- 药材剂量需符合《中国药典》标准
- 标注君臣佐使关系（role 字段）
- 如有加减需说明原因
- 妊娠禁忌药材需特别标注
- 如患者有过敏史，必须避开相关药材

请只返回一个 JSON 对象，不要包含任何其他文字或 Markdown 标记，字段名必须与下列结构完全一致：
{PRESCRIPTION_SCHEMA}"#
    )
}

fn modality_focus(modality: Modality) -> &'static str {
    match modality {
        Modality::Xray => "骨骼结构、关节间隙、肺野透亮度、心影大小及纵隔位置",
        Modality::Ct => "各层面组织密度、占位性病变、出血或钙化、结构对称性",
        Modality::Mri => "各序列信号强度、软组织对比、脑实质及脊髓、异常强化",
        Modality::Ultrasound => "回声强弱及均匀性、边界、血流信号、器官大小形态",
        Modality::PetCt => "代谢摄取分布、高代谢病灶位置及 SUV 值、与解剖结构的对应关系",
    }
}

pub fn imaging_prompt(modality: Modality, patient: Option<&PatientContext>) -> String {
    let patient_line = patient
        .map(|p| format!("{}\n", patient_sentence(p)))
        .unwrap_or_default();

    format!(
        r#"请分析这张{name}影像。

{patient_line}重点关注：{focus}

要求：
- 只描述影像中可见的表现，不要臆测
- severity 只能取 unknown、mild、moderate、severe、critical 之一
- confidence 为 0.0 到 1.0 之间的数字，表示你对结论的把握程度
- 所有结论仅供参考，需由专业医师确认

请只返回一个 JSON 对象，不要包含任何其他文字或 Markdown 标记，字段名必须与下列结构完全一致：
{IMAGING_SCHEMA}"#,
        name = modality.display_name(),
        focus = modality_focus(modality),
    )
}
