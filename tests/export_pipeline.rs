use std::fs;
use std::path::Path;

use dicom_dictionary_std::tags;
use tempfile::TempDir;

use tomo_dicom::{Archive, ExportOptions, export_plan, finder};

// One approved PATIENT/Helical plan with a KVCT reference image, a directly
// matching dose record, two ROIs (one with contours, one without) and a
// machine-agnostic delivery plan.
const INDEX: &str = r#"<?xml version="1.0"?>
<FullPatient>
  <patient>
    <briefPatient>
      <patientName>ARCHIVE^TEST</patientName>
      <patientID>PAT-001</patientID>
      <patientBirthDate>19800101</patientBirthDate>
      <patientGender>F</patientGender>
    </briefPatient>
    <fullPlanDataArray>
      <fullPlanDataArray>
        <plan>
          <briefPlan>
            <dbInfo><databaseUID>plan-1</databaseUID></dbInfo>
            <planLabel>Plan A</planLabel>
            <typeOfPlan>PATIENT</typeOfPlan>
            <planDeliveryType>Helical</planDeliveryType>
            <approvedPlanTrialUID>trial-1</approvedPlanTrialUID>
            <modificationTimestamp><date>20230726</date><time>101950</time></modificationTimestamp>
          </briefPlan>
          <patientPosition>HFS</patientPosition>
          <planStructureSetUID>ss-1</planStructureSetUID>
        </plan>
        <fullImageDataArray>
          <fullImageDataArray>
            <image>
              <imageType>KVCT</imageType>
              <dbInfo><databaseParent>plan-1</databaseParent></dbInfo>
              <frameOfReference>for-1</frameOfReference>
              <arrayHeader>
                <binaryFileName>kvct.img</binaryFileName>
                <dimensions><x>4</x><y>4</y><z>3</z></dimensions>
                <start><x>-1</x><y>-1</y><z>0</z></start>
                <elementSize><x>0.5</x><y>0.5</y><z>0.5</z></elementSize>
              </arrayHeader>
            </image>
          </fullImageDataArray>
        </fullImageDataArray>
      </fullPlanDataArray>
    </fullPlanDataArray>
    <fullImageDataArray>
      <fullImageDataArray>
        <image>
          <imageType>Opt_Dose_After_EOP</imageType>
          <dbInfo><databaseParent>plan-1</databaseParent></dbInfo>
          <frameOfReference>for-1</frameOfReference>
          <arrayHeader>
            <binaryFileName>dose.img</binaryFileName>
            <dimensions><x>2</x><y>2</y><z>2</z></dimensions>
            <start><x>-1</x><y>-1</y><z>0</z></start>
            <elementSize><x>1</x><y>1</y><z>0.5</z></elementSize>
          </arrayHeader>
        </image>
      </fullImageDataArray>
    </fullImageDataArray>
    <troiList>
      <troiList>
        <briefROI>
          <name>Target</name>
          <dbInfo><databaseParent>ss-1</databaseParent></dbInfo>
          <color><red>255</red><green>0</green><blue>0</blue></color>
        </briefROI>
        <curveDataFile>target.curve</curveDataFile>
      </troiList>
      <troiList>
        <briefROI>
          <name>NoPoints</name>
          <dbInfo><databaseParent>ss-1</databaseParent></dbInfo>
          <color><red>0</red><green>255</green><blue>0</blue></color>
        </briefROI>
      </troiList>
      <troiList>
        <briefROI>
          <name>OtherSet</name>
          <dbInfo><databaseParent>ss-other</databaseParent></dbInfo>
          <color><red>0</red><green>0</green><blue>255</blue></color>
        </briefROI>
      </troiList>
    </troiList>
    <fullDeliveryPlanDataArray>
      <fullDeliveryPlanDataArray>
        <deliveryPlan>
          <dbInfo><databaseUID>dp-1</databaseUID><databaseParent>plan-1</databaseParent></dbInfo>
          <purpose>Machine_Agnostic</purpose>
        </deliveryPlan>
        <binaryFileNameArray>
          <binaryFileNameArray>sino1.bin</binaryFileNameArray>
        </binaryFileNameArray>
      </fullDeliveryPlanDataArray>
    </fullDeliveryPlanDataArray>
  </patient>
</FullPatient>
"#;

const CURVE: &str = r#"<?xml version="1.0"?>
<curveData>
  <pointData numDataPoints="4">-0.5,-0.5,0.5;
0.5,-0.5,0.5;
0.5,0.5,0.5;
-0.5,0.5,0.5;
</pointData>
</curveData>
"#;

fn write_u16(path: &Path, values: &[u16]) {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(path, bytes).expect("failed writing binary fixture");
}

fn write_f32(path: &Path, values: &[f32]) {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(path, bytes).expect("failed writing binary fixture");
}

fn write_f64(path: &Path, values: &[f64]) {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(path, bytes).expect("failed writing binary fixture");
}

fn build_archive_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("failed creating tempdir");
    fs::write(dir.path().join("TEST_patient.xml"), INDEX).expect("failed writing index");
    fs::write(dir.path().join("target.curve"), CURVE).expect("failed writing curve");

    let image_values: Vec<u16> = (0..48).map(|v| 1000 + v).collect();
    write_u16(&dir.path().join("kvct.img"), &image_values);
    write_f32(
        &dir.path().join("dose.img"),
        &[0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0],
    );
    write_f64(&dir.path().join("sino1.bin"), &vec![0.5; 128]);
    dir
}

#[test]
fn approved_plan_discovery_finds_the_helical_plan() {
    let dir = build_archive_dir();
    let archive =
        Archive::load(dir.path(), "TEST_patient.xml").expect("archive index should load");

    let plans = finder::find_approved_plans(&archive, Some("Helical"));
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0], ("plan-1".to_string(), "Plan A".to_string()));
    assert_eq!(finder::select_first(&plans), Some("plan-1"));
}

#[test]
fn export_produces_the_four_object_kinds() {
    let dir = build_archive_dir();
    let archive =
        Archive::load(dir.path(), "TEST_patient.xml").expect("archive index should load");
    let out = tempfile::tempdir().expect("failed creating output tempdir");

    let summary = export_plan(&archive, "plan-1", out.path(), &ExportOptions::default())
        .expect("export should succeed");

    // one CT file per declared z slice
    assert_eq!(summary.ct_slices, 3);
    for index in 1..=3 {
        assert!(
            out.path().join("CT").join(format!("CT_{index:03}.dcm")).exists(),
            "CT slice {index} missing"
        );
    }
    let ct_files = fs::read_dir(out.path().join("CT"))
        .expect("CT directory exists")
        .count();
    assert_eq!(ct_files, 3);

    let ct = dicom::object::open_file(out.path().join("CT").join("CT_001.dcm"))
        .expect("CT slice should read back");
    let name = ct
        .element(tags::PATIENT_NAME)
        .expect("patient name present")
        .to_str()
        .expect("patient name reads");
    assert_eq!(name.trim_end(), "ARCHIVE^TEST");
    let rows: u16 = ct
        .element(tags::ROWS)
        .expect("rows present")
        .to_int()
        .expect("rows parse");
    assert_eq!(rows, 4);

    // exactly one dose file, with one frame per dose z slice
    let dose = dicom::object::open_file(&summary.dose_file).expect("dose should read back");
    let frames: i32 = dose
        .element(tags::NUMBER_OF_FRAMES)
        .expect("frame count present")
        .to_int()
        .expect("frame count parses");
    assert_eq!(frames, 2);

    // the structure set holds the two ROIs of the plan's structure set:
    // one populated contour sequence and one empty one
    let rtss =
        dicom::object::open_file(&summary.structure_file).expect("structure set should read back");
    let rois = rtss
        .element(tags::STRUCTURE_SET_ROI_SEQUENCE)
        .expect("roi sequence present")
        .value()
        .items()
        .expect("sequence holds items");
    assert_eq!(rois.len(), 2);

    let contour_sets = rtss
        .element(tags::ROI_CONTOUR_SEQUENCE)
        .expect("contour sequence present")
        .value()
        .items()
        .expect("sequence holds items");
    let populated = contour_sets[0]
        .element(tags::CONTOUR_SEQUENCE)
        .expect("first roi has contours")
        .value()
        .items()
        .expect("sequence holds items");
    assert_eq!(populated.len(), 1);
    let empty = contour_sets[1]
        .element(tags::CONTOUR_SEQUENCE)
        .expect("second roi has a contour sequence")
        .value()
        .items()
        .expect("sequence holds items");
    assert!(empty.is_empty());

    // the plan references the structure set actually written
    let rtss_uid = rtss
        .element(tags::SOP_INSTANCE_UID)
        .expect("structure set uid present")
        .to_str()
        .expect("structure set uid reads");
    let rtplan = dicom::object::open_file(&summary.plan_file).expect("plan should read back");
    let referenced = rtplan
        .element(tags::REFERENCED_STRUCTURE_SET_SEQUENCE)
        .expect("structure set reference present")
        .value()
        .items()
        .expect("sequence holds items")[0]
        .element(tags::REFERENCED_SOP_INSTANCE_UID)
        .expect("referenced uid present")
        .to_str()
        .expect("referenced uid reads");
    assert_eq!(referenced.trim_end(), rtss_uid.trim_end());

    let label = rtplan
        .element(tags::RT_PLAN_LABEL)
        .expect("plan label present")
        .to_str()
        .expect("plan label reads");
    assert_eq!(label.trim(), "Plan A");

    // all four objects share the generated study and frame of reference
    let study = ct
        .element(tags::STUDY_INSTANCE_UID)
        .expect("study uid present")
        .to_str()
        .expect("study uid reads")
        .trim_end()
        .to_string();
    for obj in [&dose, &rtss, &rtplan] {
        let other = obj
            .element(tags::STUDY_INSTANCE_UID)
            .expect("study uid present")
            .to_str()
            .expect("study uid reads");
        assert_eq!(other.trim_end(), study);
    }
}

#[test]
fn export_of_an_unknown_plan_fails() {
    let dir = build_archive_dir();
    let archive =
        Archive::load(dir.path(), "TEST_patient.xml").expect("archive index should load");
    let out = tempfile::tempdir().expect("failed creating output tempdir");

    let err = export_plan(&archive, "plan-absent", out.path(), &ExportOptions::default())
        .expect_err("unknown plan uid must fail");
    assert!(err.to_string().contains("plan-absent"));
}
